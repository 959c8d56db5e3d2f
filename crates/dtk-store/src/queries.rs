//! Query builder for stored sensor records.
//!
//! Recency is defined by the store-assigned `id`, never by `captured_at`
//! (timestamps have second resolution and collide), so every query orders
//! by `id`.
//!
//! # Example
//!
//! ```
//! use dtk_store::{RecordQuery, Store};
//!
//! let store = Store::open_in_memory()?;
//!
//! // The 15 newest records of device 18, newest first
//! let query = RecordQuery::new().device(18).limit(15);
//! let records = store.query(&query)?;
//!
//! // Everything stored after id 120, in insertion order
//! let feed = RecordQuery::new().after_id(120).oldest_first();
//! let new_records = store.query(&feed)?;
//! # Ok::<(), dtk_store::Error>(())
//! ```

/// Fluent query builder for sensor records.
///
/// Use this to construct queries for [`Store::query`](crate::Store::query).
/// All filter methods are optional and can be chained in any order.
///
/// By default, queries return results ordered by `id` descending
/// (newest first).
#[derive(Debug, Default, Clone)]
pub struct RecordQuery {
    /// Filter by device ID.
    pub device_id: Option<i64>,
    /// Only records with an id strictly greater than this.
    pub after_id: Option<i64>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by id descending (newest first).
    pub newest_first: bool,
}

impl RecordQuery {
    /// Create a new query with default settings.
    ///
    /// Default behavior:
    /// - No device filter (all devices)
    /// - No id lower bound
    /// - No limit (all matching records)
    /// - Ordered by newest first
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Only include records from the specified device.
    pub fn device(mut self, device_id: i64) -> Self {
        self.device_id = Some(device_id);
        self
    }

    /// Only include records inserted after the record with this id.
    pub fn after_id(mut self, id: i64) -> Self {
        self.after_id = Some(id);
        self
    }

    /// Limit the maximum number of results returned.
    ///
    /// The limit applies in the query's ordering, so `new().limit(n)` picks
    /// the `n` newest records and `oldest_first().limit(n)` the `n` oldest.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results by oldest first (ascending by `id`).
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<i64>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(device_id) = self.device_id {
            conditions.push("device_id = ?");
            params.push(device_id);
        }

        if let Some(after_id) = self.after_id {
            conditions.push("id > ?");
            params.push(after_id);
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, device_id, humidity, temperature, ec, captured_at \
             FROM sensor_data {} ORDER BY id {}",
            where_clause, order
        );

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset))
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            // SQLite needs a LIMIT before OFFSET; -1 means unbounded.
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_query_new_defaults() {
        let query = RecordQuery::new();
        assert!(query.device_id.is_none());
        assert!(query.after_id.is_none());
        assert!(query.limit.is_none());
        assert!(query.offset.is_none());
        assert!(query.newest_first);
    }

    #[test]
    fn test_record_query_default_is_different_from_new() {
        assert!(!RecordQuery::default().newest_first);
        assert!(RecordQuery::new().newest_first);
    }

    #[test]
    fn test_record_query_chaining() {
        let query = RecordQuery::new()
            .device(18)
            .after_id(100)
            .limit(10)
            .offset(5)
            .oldest_first();

        assert_eq!(query.device_id, Some(18));
        assert_eq!(query.after_id, Some(100));
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, Some(5));
        assert!(!query.newest_first);
    }

    #[test]
    fn test_build_where_empty() {
        let (where_clause, params) = RecordQuery::new().build_where();
        assert_eq!(where_clause, "");
        assert!(params.is_empty());
    }

    #[test]
    fn test_build_where_all_filters() {
        let (where_clause, params) = RecordQuery::new().device(3).after_id(9).build_where();
        assert_eq!(where_clause, "WHERE device_id = ? AND id > ?");
        assert_eq!(params, vec![3, 9]);
    }

    #[test]
    fn test_build_sql_orders_by_id() {
        let sql = RecordQuery::new().build_sql();
        assert!(sql.contains("FROM sensor_data"));
        assert!(sql.ends_with("ORDER BY id DESC"));

        let sql = RecordQuery::new().oldest_first().build_sql();
        assert!(sql.ends_with("ORDER BY id ASC"));
    }

    #[test]
    fn test_build_sql_pagination() {
        assert!(
            RecordQuery::new()
                .limit(15)
                .build_sql()
                .ends_with("LIMIT 15")
        );
        assert!(
            RecordQuery::new()
                .limit(50)
                .offset(50)
                .build_sql()
                .ends_with("LIMIT 50 OFFSET 50")
        );
        assert!(
            RecordQuery::new()
                .offset(7)
                .build_sql()
                .ends_with("LIMIT -1 OFFSET 7")
        );
    }
}
