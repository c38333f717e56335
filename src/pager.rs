use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::data::GalleryService;
use crate::filters::FilterSet;
use crate::gallery::{GalleryError, Item, VideosRequest};

pub const DEFAULT_PAGE_LIMIT: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
}

impl PageCursor {
    pub fn new(limit: u32) -> Self {
        Self {
            page: 1,
            limit: limit.max(1),
            has_more: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Replace,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading { generation: u64, mode: LoadMode },
}

/// One dispatched page request, tagged with the filter generation it
/// belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTicket {
    pub generation: u64,
    pub mode: LoadMode,
    pub request: VideosRequest,
}

#[derive(Debug)]
pub enum LoadOutcome {
    Replace(Vec<Item>),
    Append(Vec<Item>),
    /// Superseded by a newer reset; nothing was applied.
    Stale,
    Failed(GalleryError),
}

/// Page cursor and single-flight bookkeeping for incremental loading.
#[derive(Debug)]
pub struct PageLoader {
    cursor: PageCursor,
    state: LoadState,
    generation: u64,
}

impl PageLoader {
    pub fn new(limit: u32) -> Self {
        Self {
            cursor: PageCursor::new(limit),
            state: LoadState::Idle,
            generation: 0,
        }
    }

    pub fn cursor(&self) -> PageCursor {
        self.cursor
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, LoadState::Loading { .. })
    }

    pub fn has_more(&self) -> bool {
        self.cursor.has_more
    }

    /// Starts a load. A reset always proceeds and supersedes whatever is in
    /// flight; a follow-up page is refused while loading or once the last
    /// page has been seen.
    pub fn begin(&mut self, filters: &FilterSet, reset: bool) -> Option<PageTicket> {
        let mode = if reset {
            self.generation = self.generation.wrapping_add(1);
            self.cursor.page = 1;
            self.cursor.has_more = true;
            LoadMode::Replace
        } else {
            if self.is_loading() || !self.cursor.has_more {
                return None;
            }
            LoadMode::Append
        };

        self.state = LoadState::Loading {
            generation: self.generation,
            mode,
        };
        Some(PageTicket {
            generation: self.generation,
            mode,
            request: VideosRequest {
                filters: filters.clone(),
                page: self.cursor.page,
                limit: self.cursor.limit,
            },
        })
    }

    pub fn finish(
        &mut self,
        ticket: &PageTicket,
        result: Result<Vec<Item>, GalleryError>,
    ) -> LoadOutcome {
        let current = matches!(
            self.state,
            LoadState::Loading { generation, .. } if generation == ticket.generation
        );
        if !current {
            tracing::debug!(
                generation = ticket.generation,
                page = ticket.request.page,
                "pager: dropping stale page"
            );
            return LoadOutcome::Stale;
        }
        self.state = LoadState::Idle;

        match result {
            Ok(items) => {
                self.cursor.page = self.cursor.page.saturating_add(1);
                self.cursor.has_more = items.len() >= self.cursor.limit as usize;
                tracing::debug!(
                    page = ticket.request.page,
                    count = items.len(),
                    has_more = self.cursor.has_more,
                    "pager: page loaded"
                );
                match ticket.mode {
                    LoadMode::Replace => LoadOutcome::Replace(items),
                    LoadMode::Append => LoadOutcome::Append(items),
                }
            }
            Err(err) => {
                tracing::warn!(page = ticket.request.page, error = %err, "pager: page load failed");
                LoadOutcome::Failed(err)
            }
        }
    }
}

struct PageResponse {
    ticket: PageTicket,
    result: Result<Vec<Item>, GalleryError>,
}

/// Runs page fetches on worker threads and feeds the results back through
/// the loader on the caller's thread.
pub struct Pager {
    loader: PageLoader,
    service: Arc<dyn GalleryService>,
    tx: Sender<PageResponse>,
    rx: Receiver<PageResponse>,
}

impl Pager {
    pub fn new(service: Arc<dyn GalleryService>, limit: u32) -> Self {
        let (tx, rx) = unbounded();
        Self {
            loader: PageLoader::new(limit),
            service,
            tx,
            rx,
        }
    }

    pub fn loader(&self) -> &PageLoader {
        &self.loader
    }

    pub fn is_loading(&self) -> bool {
        self.loader.is_loading()
    }

    pub fn has_more(&self) -> bool {
        self.loader.has_more()
    }

    /// Returns whether a request was dispatched.
    pub fn load(&mut self, filters: &FilterSet, reset: bool) -> bool {
        let Some(ticket) = self.loader.begin(filters, reset) else {
            return false;
        };
        let service = self.service.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = service.videos(&ticket.request);
            let _ = tx.send(PageResponse { ticket, result });
        });
        true
    }

    /// Drains finished fetches. Stale responses are filtered out.
    pub fn poll(&mut self) -> Vec<LoadOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(response) = self.rx.try_recv() {
            match self.loader.finish(&response.ticket, response.result) {
                LoadOutcome::Stale => {}
                outcome => outcomes.push(outcome),
            }
        }
        outcomes
    }

    /// Blocks until the in-flight fetch (if any) resolves.
    pub fn wait(&mut self) -> Vec<LoadOutcome> {
        while self.loader.is_loading() {
            let Ok(response) = self.rx.recv() else {
                break;
            };
            match self.loader.finish(&response.ticket, response.result) {
                LoadOutcome::Stale => {}
                outcome => return vec![outcome],
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crossbeam_channel::bounded;

    use crate::filters::FilterCategory;
    use crate::gallery::FilterOptions;

    fn items(count: usize) -> Vec<Item> {
        (0..count)
            .map(|i| Item {
                title: Some(format!("item {i}")),
                ..Item::default()
            })
            .collect()
    }

    fn transport_error() -> GalleryError {
        GalleryError::Decode(serde_json::from_str::<Vec<Item>>("nope").unwrap_err())
    }

    #[test]
    fn full_page_keeps_has_more() {
        let mut loader = PageLoader::new(50);
        let ticket = loader.begin(&FilterSet::default(), true).unwrap();
        loader.finish(&ticket, Ok(items(50)));
        assert!(loader.has_more());
        assert_eq!(loader.cursor().page, 2);
    }

    #[test]
    fn short_page_ends_pagination() {
        for count in [0usize, 1, 49] {
            let mut loader = PageLoader::new(50);
            let ticket = loader.begin(&FilterSet::default(), true).unwrap();
            loader.finish(&ticket, Ok(items(count)));
            assert!(!loader.has_more(), "count {count}");
            assert!(loader.begin(&FilterSet::default(), false).is_none());
        }
    }

    #[test]
    fn follow_up_refused_while_loading() {
        let mut loader = PageLoader::new(10);
        let first = loader.begin(&FilterSet::default(), true).unwrap();
        assert!(loader.begin(&FilterSet::default(), false).is_none());
        assert_eq!(
            loader.state(),
            LoadState::Loading {
                generation: first.generation,
                mode: LoadMode::Replace
            }
        );
    }

    #[test]
    fn failure_leaves_cursor_and_clears_loading() {
        let mut loader = PageLoader::new(10);
        let first = loader.begin(&FilterSet::default(), true).unwrap();
        loader.finish(&first, Ok(items(10)));
        let before = loader.cursor();

        let ticket = loader.begin(&FilterSet::default(), false).unwrap();
        assert_eq!(ticket.request.page, 2);
        let outcome = loader.finish(&ticket, Err(transport_error()));
        assert!(matches!(outcome, LoadOutcome::Failed(_)));
        assert_eq!(loader.cursor(), before);
        assert_eq!(loader.state(), LoadState::Idle);

        let retry = loader.begin(&FilterSet::default(), false).unwrap();
        assert_eq!(retry.request.page, 2);
    }

    #[test]
    fn reset_supersedes_in_flight_page() {
        let mut loader = PageLoader::new(10);
        let first = loader.begin(&FilterSet::default(), true).unwrap();
        loader.finish(&first, Ok(items(10)));
        let old = loader.begin(&FilterSet::default(), false).unwrap();

        let mut filters = FilterSet::default();
        filters.toggle(FilterCategory::Platform, "TikTok");
        let fresh = loader.begin(&filters, true).unwrap();
        assert_eq!(fresh.request.page, 1);
        assert!(fresh.generation > old.generation);

        assert!(matches!(
            loader.finish(&old, Ok(items(10))),
            LoadOutcome::Stale
        ));
        assert!(loader.is_loading());
        match loader.finish(&fresh, Ok(items(3))) {
            LoadOutcome::Replace(page) => assert_eq!(page.len(), 3),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn follow_up_pages_append() {
        let mut loader = PageLoader::new(2);
        let first = loader.begin(&FilterSet::default(), true).unwrap();
        assert!(matches!(
            loader.finish(&first, Ok(items(2))),
            LoadOutcome::Replace(_)
        ));
        let next = loader.begin(&FilterSet::default(), false).unwrap();
        assert!(matches!(
            loader.finish(&next, Ok(items(1))),
            LoadOutcome::Append(_)
        ));
    }

    struct GatedService {
        calls: AtomicUsize,
        gate: Receiver<()>,
    }

    impl GalleryService for GatedService {
        fn filter_options(&self) -> Result<FilterOptions, GalleryError> {
            Ok(FilterOptions::default())
        }

        fn videos(&self, _request: &VideosRequest) -> Result<Vec<Item>, GalleryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.gate.recv();
            Ok(items(5))
        }
    }

    #[test]
    fn second_load_while_unresolved_issues_no_request() {
        let (release, gate) = bounded(1);
        let service = Arc::new(GatedService {
            calls: AtomicUsize::new(0),
            gate,
        });
        let mut pager = Pager::new(service.clone(), 5);

        assert!(pager.load(&FilterSet::default(), true));
        pager.wait_for_start(&service.calls);
        assert!(!pager.load(&FilterSet::default(), false));

        release.send(()).unwrap();
        let outcomes = pager.wait();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert!(!pager.is_loading());
    }

    impl Pager {
        fn wait_for_start(&self, calls: &AtomicUsize) {
            while calls.load(Ordering::SeqCst) == 0 {
                thread::yield_now();
            }
        }
    }
}
