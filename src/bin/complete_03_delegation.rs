//! Delegation by composition: a set wrapper that forwards everything to an
//! inner `HashSet` except insertion, which it counts.
//!
//! Run with: cargo run --bin complete_03_delegation

use std::collections::HashSet;
use std::hash::Hash;
use std::ops::Deref;

// =============================================================================
// Milestone 1: Forward reads through Deref, override writes by hand
// =============================================================================

#[derive(Debug, Default)]
pub struct CountingSet<T> {
    inner: HashSet<T>,
    attempted_adds: usize,
}

impl<T: Eq + Hash> CountingSet<T> {
    pub fn new() -> Self {
        Self {
            inner: HashSet::new(),
            attempted_adds: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> bool {
        self.attempted_adds += 1;
        self.inner.insert(value)
    }

    pub fn insert_all<I: IntoIterator<Item = T>>(&mut self, values: I) -> usize {
        let mut added = 0;
        for value in values {
            if self.insert(value) {
                added += 1;
            }
        }
        added
    }

    pub fn remove(&mut self, value: &T) -> bool {
        self.inner.remove(value)
    }

    pub fn attempted_adds(&self) -> usize {
        self.attempted_adds
    }
}

/// Read-only methods (`len`, `contains`, `iter`, ...) come from the inner set.
impl<T> Deref for CountingSet<T> {
    type Target = HashSet<T>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

// =============================================================================
// Milestone 2: Delegating a trait, overriding one method
// =============================================================================

pub trait Greeter {
    fn name(&self) -> String;

    fn greet(&self) -> String {
        format!("Hello from {}", self.name())
    }
}

pub struct BaseGreeter {
    pub name: String,
}

impl Greeter for BaseGreeter {
    fn name(&self) -> String {
        self.name.clone()
    }
}

pub struct LoudGreeter<G> {
    delegate: G,
}

impl<G: Greeter> LoudGreeter<G> {
    pub fn new(delegate: G) -> Self {
        Self { delegate }
    }
}

impl<G: Greeter> Greeter for LoudGreeter<G> {
    fn name(&self) -> String {
        self.delegate.name()
    }

    fn greet(&self) -> String {
        self.delegate.greet().to_uppercase() + "!"
    }
}

fn main() {
    println!("=== Delegation by Composition ===\n");

    let mut set = CountingSet::new();
    set.insert("kotlin");
    set.insert("rust");
    let added = set.insert_all(["rust", "go", "zig"]);

    println!("insert_all added {} of 3 values", added);
    println!("Insert attempts (overridden): {}", set.attempted_adds());
    println!("Set size (forwarded): {}", set.len());
    println!("Contains 'go' (forwarded): {}", set.contains("go"));

    let loud = LoudGreeter::new(BaseGreeter {
        name: "delegate".to_string(),
    });
    println!("\n{}", loud.greet());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_attempts_including_duplicates() {
        let mut set = CountingSet::new();
        assert!(set.insert(1));
        assert!(!set.insert(1));
        assert_eq!(set.insert_all(vec![1, 2, 3]), 2);

        assert_eq!(set.attempted_adds(), 5);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_reads_forward_to_inner_set() {
        let mut set = CountingSet::new();
        set.insert_all(["a", "b"]);
        assert!(set.contains("a"));
        assert!(set.remove(&"a"));
        assert!(!set.contains("a"));
        assert_eq!(set.iter().count(), 1);
    }

    #[test]
    fn test_overridden_method_wraps_delegate() {
        let loud = LoudGreeter::new(BaseGreeter {
            name: "ann".to_string(),
        });
        assert_eq!(loud.name(), "ann");
        assert_eq!(loud.greet(), "HELLO FROM ANN!");
    }
}
