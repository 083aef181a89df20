//! Analysis of the data couplings among a set of disciplines.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::discipline::Discipline;

/// The coupling structure of a set of disciplines.
///
/// A variable is coupling when some discipline produces it and some
/// discipline (possibly the same) consumes it. Couplings exchanged within
/// a cycle of the discipline dependency graph are strong; the others are
/// weak and a plain ordered execution resolves them.
pub struct CouplingStructure {
    inputs: Vec<HashSet<String>>,
    outputs: Vec<HashSet<String>>,
    all_couplings: Vec<String>,
    strong_couplings: Vec<String>,
}

impl CouplingStructure {
    /// Analyze the couplings of the given disciplines.
    pub fn new(disciplines: &[Arc<dyn Discipline>]) -> Self {
        let inputs: Vec<HashSet<String>> = disciplines
            .iter()
            .map(|d| d.input_names().iter().cloned().collect())
            .collect();
        let outputs: Vec<HashSet<String>> = disciplines
            .iter()
            .map(|d| d.output_names().iter().cloned().collect())
            .collect();

        // sorted for deterministic iteration order in the solvers
        let mut all: BTreeSet<String> = BTreeSet::new();
        for out in &outputs {
            for name in out {
                if inputs.iter().any(|input| input.contains(name)) {
                    all.insert(name.clone());
                }
            }
        }

        let components = strongly_connected_components(&inputs, &outputs);
        let mut strong: BTreeSet<String> = BTreeSet::new();
        // self couplings are strong whatever the graph
        for (input, output) in inputs.iter().zip(outputs.iter()) {
            for name in output.intersection(input) {
                strong.insert(name.clone());
            }
        }
        for component in &components {
            if component.len() < 2 {
                continue;
            }
            for &i in component {
                for &j in component {
                    if i == j {
                        continue;
                    }
                    for name in outputs[i].intersection(&inputs[j]) {
                        strong.insert(name.clone());
                    }
                }
            }
        }

        CouplingStructure {
            inputs,
            outputs,
            all_couplings: all.into_iter().collect(),
            strong_couplings: strong.into_iter().collect(),
        }
    }

    /// All coupling variable names, sorted.
    pub fn all_couplings(&self) -> &[String] {
        &self.all_couplings
    }

    /// The strongly coupled variable names, sorted.
    pub fn strong_couplings(&self) -> &[String] {
        &self.strong_couplings
    }

    /// The weakly coupled variable names, sorted.
    pub fn weak_couplings(&self) -> Vec<String> {
        self.all_couplings
            .iter()
            .filter(|name| !self.strong_couplings.contains(name))
            .cloned()
            .collect()
    }

    /// The index of a discipline producing the variable, if any.
    pub fn producer_of(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|out| out.contains(name))
    }

    /// Whether the variable feeds the discipline of the given index.
    pub fn feeds(&self, name: &str, discipline: usize) -> bool {
        self.inputs[discipline].contains(name)
    }
}

/// Strongly connected components of the discipline dependency graph,
/// where discipline `i` points to `j` when an output of `i` is an input
/// of `j`. Iterative Tarjan, no recursion.
fn strongly_connected_components(
    inputs: &[HashSet<String>],
    outputs: &[HashSet<String>],
) -> Vec<Vec<usize>> {
    let n = inputs.len();
    let mut successors: Vec<Vec<usize>> = vec![vec![]; n];
    for i in 0..n {
        for j in 0..n {
            if i != j && !outputs[i].is_disjoint(&inputs[j]) {
                successors[i].push(j);
            }
        }
    }

    let mut index = vec![usize::MAX; n];
    let mut lowlink = vec![usize::MAX; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = vec![];
    let mut next_index = 0;
    let mut components = vec![];

    for start in 0..n {
        if index[start] != usize::MAX {
            continue;
        }
        // explicit call stack of (node, next successor position)
        let mut call_stack: Vec<(usize, usize)> = vec![(start, 0)];
        while let Some(&(v, pos)) = call_stack.last() {
            if index[v] == usize::MAX {
                index[v] = next_index;
                lowlink[v] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack[v] = true;
            }
            if let Some(&w) = successors[v].get(pos) {
                call_stack.last_mut().expect("non-empty call stack").1 += 1;
                if index[w] == usize::MAX {
                    call_stack.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            } else {
                call_stack.pop();
                if let Some(&(parent, _)) = call_stack.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }
                if lowlink[v] == index[v] {
                    let mut component = vec![];
                    loop {
                        let w = stack.pop().expect("Tarjan stack underflow");
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    components.push(component);
                }
            }
        }
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discipline::{CallableDiscipline, DisciplineData};

    fn discipline(name: &str, inputs: &[&str], outputs: &[&str]) -> Arc<dyn Discipline> {
        Arc::new(CallableDiscipline::new(name, inputs, outputs, |_| {
            Ok(DisciplineData::new())
        }))
    }

    #[test]
    fn test_cycle_gives_strong_couplings() {
        let structure = CouplingStructure::new(&[
            discipline("d1", &["z", "j"], &["i"]),
            discipline("d2", &["i"], &["j"]),
        ]);
        assert_eq!(structure.all_couplings(), ["i", "j"]);
        assert_eq!(structure.strong_couplings(), ["i", "j"]);
        assert!(structure.weak_couplings().is_empty());
    }

    #[test]
    fn test_chain_gives_weak_couplings() {
        let structure = CouplingStructure::new(&[
            discipline("d1", &["a"], &["b"]),
            discipline("d2", &["b"], &["c"]),
        ]);
        assert_eq!(structure.all_couplings(), ["b"]);
        assert!(structure.strong_couplings().is_empty());
        assert_eq!(structure.weak_couplings(), ["b"]);
    }

    #[test]
    fn test_disjoint_disciplines_have_no_coupling() {
        let structure = CouplingStructure::new(&[
            discipline("d1", &["a"], &["b"]),
            discipline("d2", &["c"], &["d"]),
        ]);
        assert!(structure.all_couplings().is_empty());
    }

    #[test]
    fn test_self_coupling_is_strong() {
        let structure =
            CouplingStructure::new(&[discipline("d1", &["x", "y"], &["y"])]);
        assert_eq!(structure.strong_couplings(), ["y"]);
    }

    #[test]
    fn test_three_discipline_cycle() {
        let structure = CouplingStructure::new(&[
            discipline("d1", &["c"], &["a"]),
            discipline("d2", &["a"], &["b"]),
            discipline("d3", &["b"], &["c"]),
        ]);
        assert_eq!(structure.strong_couplings(), ["a", "b", "c"]);
        assert_eq!(structure.producer_of("b"), Some(1));
        assert!(structure.feeds("a", 1));
        assert!(!structure.feeds("a", 2));
    }
}
