//! Page range selection
//!
//! Range text is parsed leniently: anything that is not a usable page number
//! is dropped instead of reported, so malformed input degrades to a partial
//! or empty selection.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};

/// Deduplicated 1-based page numbers in caller order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageSelection {
    pages: Vec<u32>,
}

impl PageSelection {
    /// Keep caller order; later duplicates are dropped.
    pub fn ordered(pages: impl IntoIterator<Item = u32>) -> Self {
        let mut seen = BTreeSet::new();
        Self {
            pages: pages.into_iter().filter(|p| seen.insert(*p)).collect(),
        }
    }

    pub fn sorted_from(pages: impl IntoIterator<Item = u32>) -> Self {
        let set: BTreeSet<u32> = pages.into_iter().collect();
        Self {
            pages: set.into_iter().collect(),
        }
    }

    pub fn pages(&self) -> &[u32] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn contains(&self, page: u32) -> bool {
        self.pages.contains(&page)
    }

    /// Ascending view, used for deletion.
    pub fn sorted(&self) -> PageSelection {
        Self::sorted_from(self.pages.iter().copied())
    }

    /// Pages of `[1, total]` not in this selection, ascending.
    pub fn complement(&self, total: u32) -> PageSelection {
        let drop: BTreeSet<u32> = self.pages.iter().copied().collect();
        Self {
            pages: (1..=total).filter(|p| !drop.contains(p)).collect(),
        }
    }

    /// Fail on the first member outside `[1, total]`.
    pub fn validate(&self, total: u32) -> Result<()> {
        match self.pages.iter().find(|&&p| p == 0 || p > total) {
            Some(&page) => Err(ValidationError::InvalidRange { page, total }.into()),
            None => Ok(()),
        }
    }
}

impl FromIterator<u32> for PageSelection {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self::ordered(iter)
    }
}

/// Parse text like `"1-3, 5, 8-10"` against a document of `total` pages.
///
/// Single numbers above `total` are ignored and range ends are clamped to it.
/// Reversed ranges, zero and anything non-numeric are dropped. The result is
/// ascending.
pub fn parse_range(input: &str, total: u32) -> PageSelection {
    let mut pages = BTreeSet::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start, end)) = part.split_once('-') {
            let (Ok(start), Ok(end)) = (start.trim().parse::<u32>(), end.trim().parse::<u32>())
            else {
                continue;
            };
            if start == 0 || start > end {
                continue;
            }
            pages.extend(start..=end.min(total));
        } else if let Ok(page) = part.parse::<u32>() {
            if page >= 1 && page <= total {
                pages.insert(page);
            }
        }
    }

    PageSelection::sorted_from(pages)
}

/// Pages whose number is a multiple of `n`. `n == 0` selects nothing.
pub fn every_nth(n: u32, total: u32) -> PageSelection {
    if n == 0 {
        return PageSelection::default();
    }
    PageSelection::sorted_from((1..=total).filter(|p| p % n == 0))
}

pub fn all_pages(total: u32) -> PageSelection {
    PageSelection::sorted_from(1..=total)
}

pub fn odd_pages(total: u32) -> PageSelection {
    PageSelection::sorted_from((1..=total).filter(|p| p % 2 == 1))
}

pub fn even_pages(total: u32) -> PageSelection {
    every_nth(2, total)
}
