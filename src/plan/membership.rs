use std::collections::HashMap;
use std::sync::Arc;

use crate::unit::{ClassKey, TestUnit};

/// How many scheduled units belong to each class instance and each group.
///
/// Built from the intercepted unit list, so units dropped by an interceptor
/// do not hold a class or group open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    classes: Vec<(ClassKey, usize)>,
    groups: Vec<(String, usize)>,
    class_index: HashMap<ClassKey, usize>,
    group_index: HashMap<String, usize>,
}

impl Membership {
    pub fn from_units(units: &[Arc<TestUnit>]) -> Self {
        let mut m = Self::default();
        for unit in units {
            let key = unit.class_key();
            match m.class_index.get(&key) {
                Some(&i) => m.classes[i].1 += 1,
                None => {
                    m.class_index.insert(key.clone(), m.classes.len());
                    m.classes.push((key, 1));
                }
            }
            for group in &unit.groups {
                match m.group_index.get(group) {
                    Some(&i) => m.groups[i].1 += 1,
                    None => {
                        m.group_index.insert(group.clone(), m.groups.len());
                        m.groups.push((group.clone(), 1));
                    }
                }
            }
        }
        m
    }

    pub fn class_count(&self, key: &ClassKey) -> usize {
        self.class_index.get(key).map_or(0, |&i| self.classes[i].1)
    }

    pub fn group_count(&self, group: &str) -> usize {
        self.group_index.get(group).map_or(0, |&i| self.groups[i].1)
    }

    /// Class instances in first-appearance order, with their unit counts.
    pub fn classes(&self) -> &[(ClassKey, usize)] {
        &self.classes
    }

    /// Groups in first-appearance order, with their unit counts.
    pub fn groups(&self) -> &[(String, usize)] {
        &self.groups
    }
}
