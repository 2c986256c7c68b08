//! Pagination state kept by an adapter between discovery calls

use crate::source::{CrawlTarget, Filter, KnownItems};

/// Where an adapter left off for the filter it is currently working through
///
/// The cursor resets itself whenever discovery is called with a different
/// filter. Targets collected by a call that then failed are carried over to
/// the next call instead of being lost with the page they came from.
#[derive(Debug, Default)]
pub struct ListingCursor {
    filter: Option<Filter>,

    /// Next listing page to request
    pub page: u32,

    /// Position in the adapter's city rotation
    pub city_index: usize,

    /// Last page the source reported for the current query, if known
    pub max_page: Option<u32>,

    /// No more targets for the current filter
    pub exhausted: bool,

    /// The start page of the current query has not been seeded yet
    unseeded: bool,

    carry: Vec<CrawlTarget>,
}

impl ListingCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the cursor if `filter` differs from the one it was built for
    pub fn seek(&mut self, filter: &Filter) {
        if self.filter.as_ref() != Some(filter) {
            *self = Self {
                filter: Some(filter.clone()),
                unseeded: true,
                ..Self::default()
            };
        }
    }

    /// Skips the listing pages already covered by stored items
    ///
    /// Applies once per query, right after a reset or a city change. The page
    /// is `known / per_page`, capped at `max_page`, then moved back by
    /// `back_off` pages without going below zero.
    pub fn seed_page(&mut self, known: usize, per_page: u32, max_page: u32, back_off: u32) {
        if !std::mem::take(&mut self.unseeded) || per_page == 0 {
            return;
        }
        let covered = u32::try_from(known / per_page as usize).unwrap_or(u32::MAX);
        self.page = covered.min(max_page).saturating_sub(back_off);
    }

    /// Moves to the next city of the rotation
    pub fn next_city(&mut self) {
        self.city_index += 1;
        self.page = 0;
        self.max_page = None;
        self.unseeded = true;
    }

    /// Takes the targets carried over from a failed call, minus any now known
    pub fn take_carry(&mut self, known: &KnownItems) -> Vec<CrawlTarget> {
        std::mem::take(&mut self.carry)
            .into_iter()
            .filter(|t| !known.matches(&t.key, t.name.as_deref()))
            .collect()
    }

    /// Keeps `collected` for the next call
    pub fn stash(&mut self, collected: Vec<CrawlTarget>) {
        self.carry = collected;
    }
}

/// Appends `target` unless it is known or already collected
pub fn push_new(collected: &mut Vec<CrawlTarget>, known: &KnownItems, target: CrawlTarget) {
    if known.matches(&target.key, target.name.as_deref()) {
        return;
    }
    if collected.iter().any(|t| t.key == target.key) {
        return;
    }
    collected.push(target);
}
