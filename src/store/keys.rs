//! Lazy, paginated key enumeration.

use std::collections::VecDeque;

use crate::dialect::KEY_PAGE_SIZE;
use crate::error::Result;

use super::Store;

/// Iterator over a store's keys in ascending order.
///
/// Pages of [`KEY_PAGE_SIZE`] keys are fetched on demand with keyset
/// pagination; each fetch checks out and returns its own session. After an
/// error the iterator is exhausted.
#[derive(Debug)]
pub struct Keys<'a> {
    store: &'a Store,
    buffer: VecDeque<String>,
    last: Option<String>,
    done: bool,
}

impl<'a> Keys<'a> {
    pub(super) fn new(store: &'a Store) -> Self {
        Self {
            store,
            buffer: VecDeque::new(),
            last: None,
            done: false,
        }
    }

    fn fetch(&mut self) -> Result<()> {
        let page = self.store.key_page(self.last.as_deref())?;
        if page.len() < KEY_PAGE_SIZE as usize {
            self.done = true;
        }
        if let Some(last) = page.last() {
            self.last = Some(last.clone());
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for Keys<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(key) = self.buffer.pop_front() {
            return Some(Ok(key));
        }
        if self.done {
            return None;
        }
        if let Err(err) = self.fetch() {
            self.done = true;
            return Some(Err(err));
        }
        self.buffer.pop_front().map(Ok)
    }
}

impl std::iter::FusedIterator for Keys<'_> {}
