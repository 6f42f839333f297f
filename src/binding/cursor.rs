//! Table traversal
//!
//! A `TableCursor` walks the key/value pairs of a table in the runtime's
//! `next` order. Each step holds the current key and value in their own
//! handles, so the pair stays valid after the cursor moves on.

use std::fmt;

use tracing::warn;

use crate::error::BindResult;
use crate::runtime::Slot;

use super::handle::{degrade, require_table, runtime_failure, ValueHandle};

/// Position in the traversal of a table
///
/// A cursor without a container is the terminal (end) cursor. Its position
/// is [`TableCursor::END`].
#[derive(Clone)]
pub struct TableCursor<'ctx> {
    container: Option<ValueHandle<'ctx>>,
    /// Pairs visited so far, counting the current one
    position: i64,
    key: Option<ValueHandle<'ctx>>,
    value: Option<ValueHandle<'ctx>>,
}

impl<'ctx> TableCursor<'ctx> {
    /// Position of the terminal cursor
    pub const END: i64 = -1;

    /// The terminal cursor
    pub fn end() -> Self {
        TableCursor {
            container: None,
            position: Self::END,
            key: None,
            value: None,
        }
    }

    /// Cursor on the first pair of `table`
    ///
    /// Returns the terminal cursor when `table` is empty, holds no
    /// reference, or is not a table.
    pub fn begin(table: &ValueHandle<'ctx>) -> Self {
        let mut cursor = TableCursor {
            container: Some(table.clone()),
            position: 0,
            key: None,
            value: None,
        };
        cursor.advance();
        cursor
    }

    /// Whether this is the terminal cursor
    #[inline]
    pub fn is_end(&self) -> bool {
        self.container.is_none()
    }

    /// Key of the current pair
    pub fn key(&self) -> Option<&ValueHandle<'ctx>> {
        self.key.as_ref()
    }

    /// Value of the current pair
    pub fn value(&self) -> Option<&ValueHandle<'ctx>> {
        self.value.as_ref()
    }

    /// Number of pairs visited, counting the current one
    ///
    /// 0 before the first advance, [`TableCursor::END`] once terminal.
    #[inline]
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Move to the next pair, becoming terminal after the last one
    pub fn advance(&mut self) {
        let Some(container) = self.container.as_ref() else {
            return;
        };
        let key = self.key.as_ref();

        match Self::step(container, key) {
            Ok(Some((key_slot, value_slot))) => {
                let ctx = container.context();
                self.key = Some(ValueHandle::from_slot(ctx, key_slot));
                self.value = Some(ValueHandle::from_slot(ctx, value_slot));
                self.position += 1;
            }
            Ok(None) => self.finish(),
            Err(err) => {
                degrade("advance", err, ());
                self.finish();
            }
        }
    }

    /// Become the terminal cursor, dropping the container and the pair
    pub fn finish(&mut self) {
        self.container = None;
        self.key = None;
        self.value = None;
        self.position = Self::END;
    }

    /// Fetch the pair after `key` (the first pair when `key` is `None`)
    fn step(
        container: &ValueHandle<'ctx>,
        key: Option<&ValueHandle<'ctx>>,
    ) -> BindResult<Option<(Slot, Slot)>> {
        container.with_pushed(|state| {
            require_table(state)?;
            match key {
                Some(key) => key.push_to_stack(state),
                None => state.push_nil(),
            }
            if !state.next(-2).map_err(runtime_failure)? {
                return Ok(None);
            }
            let value_slot = state.reference();
            let key_slot = state.reference();
            Ok(Some((key_slot, value_slot)))
        })
    }

    fn container_slot(&self) -> Option<Slot> {
        self.container.as_ref().and_then(ValueHandle::slot)
    }
}

impl Default for TableCursor<'_> {
    fn default() -> Self {
        Self::end()
    }
}

/// Terminal cursors are all equal and never equal a live one. Live cursors
/// are equal when they walk the same table slot of the same context and
/// stand at the same position.
impl PartialEq for TableCursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self.is_end(), other.is_end()) {
            (true, true) => true,
            (false, false) => {
                self.container == other.container && self.position == other.position
            }
            _ => false,
        }
    }
}

impl fmt::Debug for TableCursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_end() {
            return f.write_str("TableCursor(<end>)");
        }
        f.debug_struct("TableCursor")
            .field("container", &self.container_slot())
            .field("position", &self.position)
            .field("key", &self.key.as_ref().map(ValueHandle::value))
            .finish()
    }
}

/// Yields the current pair, then advances
impl<'ctx> Iterator for TableCursor<'ctx> {
    type Item = (ValueHandle<'ctx>, ValueHandle<'ctx>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_end() {
            return None;
        }
        let (Some(key), Some(value)) = (self.key.clone(), self.value.clone()) else {
            warn!("live table cursor without a current pair");
            self.finish();
            return None;
        };
        self.advance();
        Some((key, value))
    }
}

impl std::iter::FusedIterator for TableCursor<'_> {}

impl<'ctx> ValueHandle<'ctx> {
    /// Cursor on the first pair of this table
    pub fn begin(&self) -> TableCursor<'ctx> {
        TableCursor::begin(self)
    }

    /// The terminal cursor
    pub fn end(&self) -> TableCursor<'ctx> {
        TableCursor::end()
    }

    /// Iterate over the key/value pairs of this table
    pub fn pairs(&self) -> TableCursor<'ctx> {
        self.begin()
    }
}

impl<'a, 'ctx> IntoIterator for &'a ValueHandle<'ctx> {
    type Item = (ValueHandle<'ctx>, ValueHandle<'ctx>);
    type IntoIter = TableCursor<'ctx>;

    fn into_iter(self) -> Self::IntoIter {
        self.begin()
    }
}
