//! Pagination utilities for list endpoints
//!
//! Provides reusable pagination helpers for applying limits, ordering,
//! cursors and extracting cursor IDs from collections.

use crate::models::responses::ResponsesError;
use crate::web::responses::constants::{DEFAULT_PAGINATION_LIMIT, MAX_PAGINATION_LIMIT};

/// Pagination utilities for list endpoints
pub struct Paginator;

impl Paginator {
    /// Resolve the requested page size.
    ///
    /// Missing means the default, values above the maximum are clamped and
    /// values below one are rejected.
    pub fn resolve_limit(limit: Option<i64>) -> Result<i64, ResponsesError> {
        match limit {
            None => Ok(DEFAULT_PAGINATION_LIMIT),
            Some(n) if n < 1 => Err(ResponsesError::validation(
                "limit",
                "limit must be at least 1",
            )),
            Some(n) => Ok(n.min(MAX_PAGINATION_LIMIT)),
        }
    }

    /// Validate the `order` parameter, defaulting to `desc`.
    pub fn resolve_order(order: Option<&str>) -> Result<&'static str, ResponsesError> {
        match order {
            None | Some("desc") => Ok("desc"),
            Some("asc") => Ok("asc"),
            Some(other) => Err(ResponsesError::validation(
                "order",
                format!("invalid order '{}': must be asc or desc", other),
            )),
        }
    }

    /// Apply limit and check for more results
    ///
    /// Returns a tuple of (items, has_more) where items is truncated to the limit
    /// and has_more indicates if there were more items than the limit.
    ///
    /// # Example
    /// ```ignore
    /// let (items, has_more) = Paginator::paginate(items, 20);
    /// ```
    pub fn paginate<T>(mut items: Vec<T>, limit: i64) -> (Vec<T>, bool) {
        let limit = limit.clamp(0, MAX_PAGINATION_LIMIT) as usize;
        let has_more = items.len() > limit;

        if has_more {
            items.truncate(limit);
        }

        (items, has_more)
    }

    /// Put chronologically ordered items into the requested order
    ///
    /// # Example
    /// ```ignore
    /// let items = Paginator::apply_order(items, "desc");
    /// ```
    pub fn apply_order<T>(mut items: Vec<T>, order: &str) -> Vec<T> {
        if order == "desc" {
            items.reverse();
        }
        items
    }

    /// Drop everything up to and including the item whose id is `after`.
    pub fn apply_cursor<T, F>(
        items: Vec<T>,
        after: Option<&str>,
        id_extractor: F,
    ) -> Result<Vec<T>, ResponsesError>
    where
        F: Fn(&T) -> &str,
    {
        let Some(after) = after else {
            return Ok(items);
        };
        let position = items
            .iter()
            .position(|item| id_extractor(item) == after)
            .ok_or_else(|| {
                ResponsesError::validation("after", format!("unknown cursor '{}'", after))
            })?;
        Ok(items.into_iter().skip(position + 1).collect())
    }

    /// Get first and last IDs from items using an ID extractor function
    ///
    /// # Example
    /// ```ignore
    /// let (first_id, last_id) = Paginator::get_cursor_ids(&items, |item| item.id().to_string());
    /// ```
    pub fn get_cursor_ids<T, ID, F>(items: &[T], id_extractor: F) -> (Option<ID>, Option<ID>)
    where
        F: Fn(&T) -> ID,
    {
        let first_id = items.first().map(&id_extractor);
        let last_id = items.last().map(&id_extractor);
        (first_id, last_id)
    }
}
