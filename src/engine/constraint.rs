// src/engine/constraint.rs

//! Named capacity counters for hosts and step types.

use std::fmt;

use crate::errors::{PMonitorError, Result};

/// A named resource with a fixed capacity and a current load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub name: String,
    pub capacity: u32,
    pub load: u32,
}

impl Constraint {
    pub fn new(name: impl Into<String>, capacity: u32) -> Self {
        Self {
            name: name.into(),
            capacity,
            load: 0,
        }
    }

    /// Whether `weight` more units still fit.
    pub fn fits(&self, weight: u32) -> bool {
        self.load + weight <= self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.load >= self.capacity
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.name, self.load, self.capacity)
    }
}

/// List of constraints kept sorted ascending by load.
///
/// Sorting is stable, so among equally loaded constraints the configured
/// order decides, and a constraint that was just released moves in front of
/// its equally loaded siblings only if it was already there.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    constraints: Vec<Constraint>,
}

impl ConstraintSet {
    pub fn new<I, S>(config: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut set = Self {
            constraints: config
                .into_iter()
                .map(|(name, capacity)| Constraint::new(name, capacity))
                .collect(),
        };
        set.resort();
        set
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.name == name)
    }

    /// Sum of all capacities.
    pub fn total_capacity(&self) -> u32 {
        self.constraints.iter().map(|c| c.capacity).sum()
    }

    /// Pick the least loaded constraint that can take `weight` more units,
    /// charge it, and return its name.
    ///
    /// Returns `None` if no constraint has room; nothing is charged then.
    pub fn select(&mut self, weight: u32) -> Option<String> {
        let chosen = self.constraints.iter_mut().find(|c| c.fits(weight))?;
        chosen.load += weight;
        let name = chosen.name.clone();
        self.resort();
        Some(name)
    }

    /// Charge `weight` units to the named constraint if they fit.
    ///
    /// Returns `false` if the constraint is unknown or full.
    pub fn acquire(&mut self, name: &str, weight: u32) -> bool {
        match self.constraints.iter_mut().find(|c| c.name == name) {
            Some(c) if c.fits(weight) => {
                c.load += weight;
                self.resort();
                true
            }
            _ => false,
        }
    }

    /// Give `weight` units back to the named constraint.
    ///
    /// An unknown name or a release below zero means the dispatch/release
    /// bookkeeping is broken, which is reported as an error.
    pub fn release(&mut self, name: &str, weight: u32) -> Result<()> {
        let constraint = self
            .constraints
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| PMonitorError::UnknownConstraint(name.to_string()))?;
        constraint.load = constraint
            .load
            .checked_sub(weight)
            .ok_or_else(|| PMonitorError::ConstraintUnderflow(name.to_string()))?;
        self.resort();
        Ok(())
    }

    fn resort(&mut self) {
        self.constraints.sort_by_key(|c| c.load);
    }
}
