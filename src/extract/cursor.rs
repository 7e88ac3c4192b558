use super::source::{Page, PageHints};

/// Pagination state owned by a single extraction.
///
/// Only the extractor mutates it. The release token can be taken once, so the
/// backend cursor is torn down at most once whichever way the extraction ends.
#[derive(Debug)]
pub struct Cursor {
    token: Option<String>,
    page_size: Option<usize>,
    keep_alive: Option<String>,
    page_count: usize,
    record_count: usize,
    expended: bool,
    released: bool,
}

impl Cursor {
    /// Zero or blank hints mean "backend default".
    pub fn new(page_size: Option<usize>, keep_alive: Option<&str>) -> Self {
        Self {
            token: None,
            page_size: page_size.filter(|size| *size > 0),
            keep_alive: keep_alive.and_then(normalize_keep_alive),
            page_count: 0,
            record_count: 0,
            expended: false,
            released: false,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn page_size(&self) -> Option<usize> {
        self.page_size
    }

    pub fn keep_alive(&self) -> Option<&str> {
        self.keep_alive.as_deref()
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    pub fn is_expended(&self) -> bool {
        self.expended
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn hints(&self) -> PageHints {
        PageHints {
            page_size: self.page_size,
            keep_alive: self.keep_alive.clone(),
        }
    }

    /// Records a successfully fetched page.
    ///
    /// A page without a token keeps the previous one so the cursor can still
    /// be released.
    pub(crate) fn advance(&mut self, page: &Page) {
        if let Some(token) = &page.token {
            self.token = Some(token.clone());
        }
        self.page_count += 1;
        self.record_count += page.records.len();
        if page.is_empty() || page.exhausted {
            self.expended = true;
        }
    }

    /// Hands out the token to release, exactly once.
    pub(crate) fn take_release_token(&mut self) -> Option<String> {
        if self.released {
            return None;
        }
        self.released = true;
        self.token.clone()
    }
}

/// `"0"`, `"0s"`, `"0m"` and blank strings all mean "no keep-alive requested".
fn normalize_keep_alive(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    if raw.is_empty() || (!digits.is_empty() && digits.chars().all(|c| c == '0')) {
        return None;
    }
    Some(raw.to_string())
}
