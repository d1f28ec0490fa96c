//! Snapping of close nominal voltages to one value.
//!
//! Grids often carry 380, 400 and 405 kV on what is electrically one voltage
//! class. Resolution groups sorted distinct nominal voltages whose relative
//! distance to the first member of the group stays within the tolerance, and
//! maps every member to the most used value of the group. Per-unit ratios are
//! computed from the resolved values, so the physical solution is unchanged.

#[derive(Debug, Clone, Default)]
pub struct NominalVoltageMapping {
    /// (original, resolved) sorted by original.
    entries: Vec<(f64, f64)>,
}

impl NominalVoltageMapping {
    /// `values` holds one nominal voltage per bus, repeats included.
    pub fn new(values: impl IntoIterator<Item = f64>, tolerance: Option<f64>) -> Self {
        let mut counts: Vec<(f64, usize)> = Vec::new();
        let mut all: Vec<f64> = values.into_iter().collect();
        all.sort_by(f64::total_cmp);
        for v in all {
            match counts.last_mut() {
                Some((last, n)) if *last == v => *n += 1,
                _ => counts.push((v, 1)),
            }
        }
        let Some(tolerance) = tolerance else {
            return Self {
                entries: counts.iter().map(|&(v, _)| (v, v)).collect(),
            };
        };

        let mut entries = Vec::with_capacity(counts.len());
        let mut group: Vec<(f64, usize)> = Vec::new();
        for entry in counts {
            if let Some(&(first, _)) = group.first() {
                if (entry.0 - first) / first > tolerance {
                    flush(&mut group, &mut entries);
                }
            }
            group.push(entry);
        }
        if !group.is_empty() {
            flush(&mut group, &mut entries);
        }
        Self { entries }
    }

    pub fn resolve(&self, nominal_v: f64) -> f64 {
        self.entries
            .binary_search_by(|(v, _)| v.total_cmp(&nominal_v))
            .map(|i| self.entries[i].1)
            .unwrap_or(nominal_v)
    }
}

fn flush(group: &mut Vec<(f64, usize)>, entries: &mut Vec<(f64, f64)>) {
    let mut representative = group[0];
    for &candidate in group.iter() {
        if candidate.1 > representative.1 {
            representative = candidate;
        }
    }
    for &(v, _) in group.iter() {
        entries.push((v, representative.0));
    }
    group.clear();
}
