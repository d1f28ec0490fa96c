use std::collections::HashMap;

/// Unknown of the equation system, attached to a network element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariableType {
    BusV,
    BusPhi,
    BranchAlpha1,
    BranchRho1,
    ShuntB,
    /// Active flow through a zero-impedance tree edge.
    DummyP,
    DummyQ,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable {
    pub element: usize,
    pub kind: VariableType,
}

impl Variable {
    pub fn new(element: usize, kind: VariableType) -> Self {
        Self { element, kind }
    }

    pub fn v(bus: usize) -> Self {
        Self::new(bus, VariableType::BusV)
    }

    pub fn phi(bus: usize) -> Self {
        Self::new(bus, VariableType::BusPhi)
    }
}

/// Column numbering of the variables, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct VariableSet {
    columns: HashMap<Variable, usize>,
    order: Vec<Variable>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Column of `variable`, created on first use.
    pub fn add(&mut self, variable: Variable) -> usize {
        if let Some(&column) = self.columns.get(&variable) {
            return column;
        }
        let column = self.order.len();
        self.columns.insert(variable, column);
        self.order.push(variable);
        column
    }

    pub fn column(&self, variable: &Variable) -> Option<usize> {
        self.columns.get(variable).copied()
    }

    pub fn contains(&self, variable: &Variable) -> bool {
        self.columns.contains_key(variable)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.order.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_follow_insertion_order() {
        let mut set = VariableSet::new();
        assert_eq!(set.add(Variable::phi(3)), 0);
        assert_eq!(set.add(Variable::v(3)), 1);
        assert_eq!(set.add(Variable::phi(3)), 0);
        assert_eq!(set.len(), 2);
        assert_eq!(set.column(&Variable::v(3)), Some(1));
        assert_eq!(set.column(&Variable::v(4)), None);
    }
}
