//! Video pagination and selective subscription.
//!
//! Rendering every stream in a large class is not feasible, so only one
//! page of participants is subscribed at a time. Priority participants
//! (coach, active speaker) are pinned to the head of every page; the rest
//! of the roster is split into windows that fill the remaining tiles.
//! Every recompute is diffed against the previous visible set so only
//! entering ids are subscribed and only leaving ids unsubscribed.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default tiles per page on desktop clients.
pub const DEFAULT_DESKTOP_PAGE_SIZE: usize = 25;

/// Default tiles per page on mobile clients.
pub const DEFAULT_MOBILE_PAGE_SIZE: usize = 9;

/// Client device class, which decides page capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Mobile,
}

impl DeviceClass {
    /// Built-in page size for this device class.
    #[must_use]
    pub const fn default_page_size(&self) -> usize {
        match self {
            DeviceClass::Desktop => DEFAULT_DESKTOP_PAGE_SIZE,
            DeviceClass::Mobile => DEFAULT_MOBILE_PAGE_SIZE,
        }
    }
}

/// Configured page sizes per device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSizes {
    pub desktop: usize,
    pub mobile: usize,
}

impl Default for PageSizes {
    fn default() -> Self {
        Self {
            desktop: DEFAULT_DESKTOP_PAGE_SIZE,
            mobile: DEFAULT_MOBILE_PAGE_SIZE,
        }
    }
}

impl PageSizes {
    #[must_use]
    pub const fn for_device(&self, device: DeviceClass) -> usize {
        match device {
            DeviceClass::Desktop => self.desktop,
            DeviceClass::Mobile => self.mobile,
        }
    }
}

/// Result of a recompute.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageChange {
    /// Current page index.
    pub page: usize,
    /// Number of pages.
    pub page_count: usize,
    /// Ids on the current page, pinned first.
    pub visible: Vec<String>,
    /// Ids that became visible.
    pub subscribe: Vec<String>,
    /// Ids that stopped being visible.
    pub unsubscribe: Vec<String>,
    /// Whether page, page count or the visible set moved.
    pub changed: bool,
}

/// Current page state, for queries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PageState {
    pub page: usize,
    pub page_count: usize,
    pub visible: Vec<String>,
}

impl From<&PageChange> for PageState {
    fn from(change: &PageChange) -> Self {
        Self {
            page: change.page,
            page_count: change.page_count,
            visible: change.visible.clone(),
        }
    }
}

/// Computes the visible participant subset for one session.
#[derive(Debug, Clone)]
pub struct VideoPaginationManager {
    capacity: usize,
    roster: Vec<String>,
    priority: Vec<String>,
    current_page: usize,
    page_count: usize,
    visible: Vec<String>,
}

impl VideoPaginationManager {
    /// Manager with `capacity` tiles per page (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            roster: Vec::new(),
            priority: Vec::new(),
            current_page: 0,
            page_count: 0,
            visible: Vec::new(),
        }
    }

    /// Tiles per page.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current page index.
    #[must_use]
    pub fn current_page(&self) -> usize {
        self.current_page
    }

    /// Number of pages (zero for an empty roster).
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Ids currently visible.
    #[must_use]
    pub fn visible(&self) -> &[String] {
        &self.visible
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> PageState {
        PageState {
            page: self.current_page,
            page_count: self.page_count,
            visible: self.visible.clone(),
        }
    }

    /// Set the pinned participants and recompute.
    pub fn set_priority(&mut self, coach: Option<&str>, active_speaker: Option<&str>) -> PageChange {
        self.store_priority(coach, active_speaker);
        self.recompute(self.current_page)
    }

    /// Replace the ordered roster (self excluded) and recompute.
    pub fn update_roster(&mut self, ids: &[String]) -> PageChange {
        self.store_roster(ids);
        self.recompute(self.current_page)
    }

    /// Replace roster and pinned participants in one recompute.
    pub fn update(
        &mut self,
        ids: &[String],
        coach: Option<&str>,
        active_speaker: Option<&str>,
    ) -> PageChange {
        self.store_roster(ids);
        self.store_priority(coach, active_speaker);
        self.recompute(self.current_page)
    }

    fn store_priority(&mut self, coach: Option<&str>, active_speaker: Option<&str>) {
        self.priority = coach
            .into_iter()
            .chain(active_speaker)
            .map(ToString::to_string)
            .collect();
    }

    fn store_roster(&mut self, ids: &[String]) {
        let mut seen = HashSet::with_capacity(ids.len());
        self.roster = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
    }

    /// Jump to a page; out-of-range requests clamp.
    pub fn set_page(&mut self, page: usize) -> PageChange {
        self.recompute(page)
    }

    /// Advance one page (clamps at the last page).
    pub fn next_page(&mut self) -> PageChange {
        self.recompute(self.current_page.saturating_add(1))
    }

    /// Go back one page (clamps at the first page).
    pub fn previous_page(&mut self) -> PageChange {
        self.recompute(self.current_page.saturating_sub(1))
    }

    /// Ids that page `page` would show, without changing state.
    #[must_use]
    pub fn page_ids(&self, page: usize) -> Vec<String> {
        let (pinned, unpinned) = self.split_pinned();
        let window = self.capacity - pinned.len();
        let mut ids: Vec<String> = pinned.into_iter().cloned().collect();
        ids.extend(
            unpinned
                .into_iter()
                .skip(page.saturating_mul(window))
                .take(window)
                .cloned(),
        );
        ids
    }

    fn split_pinned(&self) -> (Vec<&String>, Vec<&String>) {
        let mut pinned: Vec<&String> = Vec::new();
        for id in &self.priority {
            if pinned.len() + 1 >= self.capacity {
                break;
            }
            if self.roster.contains(id) && !pinned.contains(&id) {
                pinned.push(id);
            }
        }
        let unpinned = self.roster.iter().filter(|id| !pinned.contains(id)).collect();
        (pinned, unpinned)
    }

    fn compute_page_count(&self) -> usize {
        if self.roster.is_empty() {
            return 0;
        }
        let (pinned, unpinned) = self.split_pinned();
        let window = self.capacity - pinned.len();
        unpinned.len().div_ceil(window).max(1)
    }

    fn recompute(&mut self, requested_page: usize) -> PageChange {
        let page_count = self.compute_page_count();
        let page = requested_page.min(page_count.saturating_sub(1));
        let visible = if page_count == 0 {
            Vec::new()
        } else {
            self.page_ids(page)
        };

        let subscribe: Vec<String> = visible
            .iter()
            .filter(|id| !self.visible.contains(id))
            .cloned()
            .collect();
        let unsubscribe: Vec<String> = self
            .visible
            .iter()
            .filter(|id| !visible.contains(id))
            .cloned()
            .collect();
        let changed = page != self.current_page
            || page_count != self.page_count
            || visible != self.visible;

        self.current_page = page;
        self.page_count = page_count;
        self.visible.clone_from(&visible);

        PageChange {
            page,
            page_count,
            visible,
            subscribe,
            unsubscribe,
            changed,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("p{i:02}")).collect()
    }

    #[test]
    fn test_57_participants_on_desktop_pages() {
        let roster = ids(57);
        let mut pager = VideoPaginationManager::new(DEFAULT_DESKTOP_PAGE_SIZE);

        let change = pager.update_roster(&roster);
        assert_eq!(change.page_count, 3);
        assert_eq!(change.visible, roster[0..25].to_vec());
        assert_eq!(pager.page_ids(1), roster[25..50].to_vec());
        assert_eq!(pager.page_ids(2), roster[50..57].to_vec());

        let change = pager.set_page(5);
        assert_eq!(change.page, 2);
        assert_eq!(change.visible, roster[50..57].to_vec());
    }

    #[test]
    fn test_empty_roster_has_no_pages() {
        let mut pager = VideoPaginationManager::new(9);
        let change = pager.update_roster(&[]);
        assert_eq!(change.page_count, 0);
        assert_eq!(change.page, 0);
        assert!(change.visible.is_empty());
        assert!(!change.changed);

        assert_eq!(pager.next_page().page, 0);
    }

    #[test]
    fn test_page_navigation_diffs_subscriptions() {
        let roster = ids(12);
        let mut pager = VideoPaginationManager::new(5);
        let first = pager.update_roster(&roster);
        assert_eq!(first.subscribe, roster[0..5].to_vec());
        assert!(first.unsubscribe.is_empty());

        let second = pager.next_page();
        assert_eq!(second.page, 1);
        assert_eq!(second.subscribe, roster[5..10].to_vec());
        assert_eq!(second.unsubscribe, roster[0..5].to_vec());

        let back = pager.previous_page();
        assert_eq!(back.page, 0);
        assert_eq!(pager.previous_page().page, 0);
    }

    #[test]
    fn test_roster_growth_only_subscribes_newcomers() {
        let mut pager = VideoPaginationManager::new(9);
        pager.update_roster(&ids(3));

        let change = pager.update_roster(&ids(5));
        assert_eq!(change.subscribe, vec!["p03".to_string(), "p04".to_string()]);
        assert!(change.unsubscribe.is_empty());
        assert!(change.changed);

        let unchanged = pager.update_roster(&ids(5));
        assert!(!unchanged.changed);
        assert!(unchanged.subscribe.is_empty());
    }

    #[test]
    fn test_pinned_participants_head_every_page() {
        let roster = ids(10);
        let mut pager = VideoPaginationManager::new(4);
        pager.update_roster(&roster);
        pager.set_priority(Some("p07"), Some("p02"));

        // Two pinned, windows of two over the remaining eight.
        assert_eq!(pager.page_count(), 4);
        assert_eq!(pager.visible(), &["p07", "p02", "p00", "p01"]);

        let change = pager.set_page(3);
        assert_eq!(change.visible, vec!["p07", "p02", "p08", "p09"]);
    }

    #[test]
    fn test_windows_partition_unpinned_roster() {
        let roster = ids(23);
        let mut pager = VideoPaginationManager::new(6);
        pager.update_roster(&roster);
        pager.set_priority(Some("p05"), None);

        let mut seen = Vec::new();
        for page in 0..pager.page_count() {
            let ids = pager.page_ids(page);
            assert_eq!(ids[0], "p05");
            seen.extend(ids.into_iter().skip(1));
        }
        let expected: Vec<String> = roster.into_iter().filter(|id| id != "p05").collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_pinning_leaves_room_for_one_tile() {
        let mut pager = VideoPaginationManager::new(2);
        pager.update_roster(&ids(4));
        pager.set_priority(Some("p03"), Some("p02"));

        // Only one pin fits when capacity is two.
        assert_eq!(pager.visible(), &["p03", "p00"]);
        assert_eq!(pager.page_count(), 3);
    }

    #[test]
    fn test_combined_update_is_one_diff() {
        let mut pager = VideoPaginationManager::new(3);
        pager.update_roster(&ids(6));

        let change = pager.update(&ids(6), Some("p05"), None);
        assert_eq!(change.visible, vec!["p05", "p00", "p01"]);
        assert_eq!(change.subscribe, vec!["p05"]);
        assert_eq!(change.unsubscribe, vec!["p02"]);
    }

    #[test]
    fn test_shrinking_roster_clamps_page() {
        let mut pager = VideoPaginationManager::new(5);
        pager.update_roster(&ids(12));
        pager.set_page(2);

        let change = pager.update_roster(&ids(4));
        assert_eq!(change.page, 0);
        assert_eq!(change.page_count, 1);
        assert_eq!(change.visible, ids(4));
    }

    #[test]
    fn test_device_class_page_sizes() {
        assert_eq!(DeviceClass::Desktop.default_page_size(), 25);
        assert_eq!(DeviceClass::Mobile.default_page_size(), 9);
    }
}
