//! Hooks run on every element created by the network builder.
//!
//! A post-processor sees the source grid element next to the freshly built
//! calculation element and may attach properties or adjust it. Processors with
//! [`LoadingPolicy::Always`] run on every build; [`LoadingPolicy::Selection`]
//! processors run only when named in `LoadFlowParameters::post_processors`.

use super::{LfBranch, LfBus, LfGenerator};
use flowsens_core::{
    CalculatedBus, DanglingLine, Generator, Line, RetainedSwitch, Side, ThreeWindingsTransformer,
    TwoWindingsTransformer, VscConverterStation,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingPolicy {
    Always,
    Selection,
}

#[derive(Debug, Clone, Copy)]
pub enum SourceBranch<'a> {
    Line(&'a Line),
    Transformer(&'a TwoWindingsTransformer),
    TransformerLeg(&'a ThreeWindingsTransformer, Side),
    DanglingLine(&'a DanglingLine),
    Switch(&'a RetainedSwitch),
}

#[derive(Debug, Clone, Copy)]
pub enum SourceGenerator<'a> {
    Generator(&'a Generator),
    VscConverter(&'a VscConverterStation),
}

pub trait NetworkPostProcessor: Send + Sync {
    fn name(&self) -> &str;

    fn loading_policy(&self) -> LoadingPolicy {
        LoadingPolicy::Selection
    }

    /// `source` is `None` for fictitious buses (3-winding star, dangling line
    /// boundary).
    fn on_bus_added(&self, _source: Option<&CalculatedBus>, _bus: &mut LfBus) {}

    fn on_branch_added(&self, _source: SourceBranch<'_>, _branch: &mut LfBranch) {}

    fn on_generator_added(&self, _source: SourceGenerator<'_>, _generator: &mut LfGenerator) {}
}

/// Processors that apply to a build, in registration order.
pub fn active_post_processors<'a>(
    processors: &'a [Box<dyn NetworkPostProcessor>],
    selection: &[String],
) -> Vec<&'a dyn NetworkPostProcessor> {
    processors
        .iter()
        .filter(|p| match p.loading_policy() {
            LoadingPolicy::Always => true,
            LoadingPolicy::Selection => selection.iter().any(|s| s == p.name()),
        })
        .map(|p| p.as_ref())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, LoadingPolicy);

    impl NetworkPostProcessor for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn loading_policy(&self) -> LoadingPolicy {
            self.1
        }
    }

    #[test]
    fn selection_filters_by_name() {
        let processors: Vec<Box<dyn NetworkPostProcessor>> = vec![
            Box::new(Named("always", LoadingPolicy::Always)),
            Box::new(Named("tagger", LoadingPolicy::Selection)),
            Box::new(Named("other", LoadingPolicy::Selection)),
        ];
        let active = active_post_processors(&processors, &["tagger".to_string()]);
        let names: Vec<&str> = active.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["always", "tagger"]);
    }
}
