///
/// Eagerly materialized cursor.
///
/// Drivers whose native result sets borrow from a live statement (rusqlite,
/// for one) copy the rows out and hand this cursor to the core instead. The
/// whole result lives in memory, so scrolling is trivial; a driver that wants
/// to mimic a forward-only backend builds it with `forward_only`, and then
/// every positioning call other than `next` reports `Unsupported`.
///
/// Cells are stored as `Result` so a driver can record a value that failed
/// to convert and let the coercion layer decide what that means.
///

use crate::driver::{ColumnInfo, Cursor, NativeValue};
use crate::errors::DriverError;

pub type Cell = Result<NativeValue, DriverError>;

#[derive(Debug)]
pub struct MaterializedCursor {
    columns: Vec<ColumnInfo>,
    rows: Vec<Vec<Cell>>,
    /// 0 before the first row, 1..=len on a row, len + 1 after the last.
    pos: usize,
    scrollable: bool,
    closed: bool,
}

impl MaterializedCursor {
    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<Vec<NativeValue>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(Ok).collect())
            .collect();
        Self::from_cells(columns, rows)
    }

    pub fn from_cells(columns: Vec<ColumnInfo>, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            columns,
            rows,
            pos: 0,
            scrollable: true,
            closed: false,
        }
    }

    pub fn forward_only(mut self) -> Self {
        self.scrollable = false;
        self
    }

    pub fn is_scrollable(&self) -> bool {
        self.scrollable
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn check_open(&self) -> Result<(), DriverError> {
        if self.closed {
            return Err(DriverError::closed("cursor"));
        }
        Ok(())
    }

    fn check_scroll(&self, what: &str) -> Result<(), DriverError> {
        self.check_open()?;
        if !self.scrollable {
            return Err(DriverError::unsupported(what));
        }
        Ok(())
    }
}

impl Cursor for MaterializedCursor {
    fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    fn next(&mut self) -> Result<bool, DriverError> {
        self.check_open()?;
        if self.pos <= self.rows.len() {
            self.pos += 1;
        }
        Ok(self.pos <= self.rows.len())
    }

    fn row(&self) -> Result<usize, DriverError> {
        self.check_open()?;
        if self.pos >= 1 && self.pos <= self.rows.len() {
            Ok(self.pos)
        } else {
            Ok(0)
        }
    }

    fn before_first(&mut self) -> Result<(), DriverError> {
        self.check_scroll("before_first")?;
        self.pos = 0;
        Ok(())
    }

    fn absolute(&mut self, row: usize) -> Result<bool, DriverError> {
        self.check_scroll("absolute positioning")?;
        if row == 0 {
            self.pos = 0;
            Ok(false)
        } else if row <= self.rows.len() {
            self.pos = row;
            Ok(true)
        } else {
            self.pos = self.rows.len() + 1;
            Ok(false)
        }
    }

    fn last(&mut self) -> Result<bool, DriverError> {
        self.check_scroll("last")?;
        if self.rows.is_empty() {
            return Ok(false);
        }
        self.pos = self.rows.len();
        Ok(true)
    }

    fn is_after_last(&self) -> Result<bool, DriverError> {
        self.check_open()?;
        Ok(!self.rows.is_empty() && self.pos > self.rows.len())
    }

    fn value(&self, column: usize) -> Result<NativeValue, DriverError> {
        self.check_open()?;
        let row = self
            .pos
            .checked_sub(1)
            .and_then(|i| self.rows.get(i))
            .ok_or_else(|| DriverError::new("cursor is not positioned on a row"))?;
        match row.get(column) {
            Some(cell) => cell.clone(),
            None => Err(DriverError::new(format!(
                "column index {} out of range",
                column + 1
            ))),
        }
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.closed = true;
        self.rows.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SqlType;
    use crate::errors::DriverErrorKind;

    fn cursor(n: i64) -> MaterializedCursor {
        let rows = (1..=n).map(|i| vec![NativeValue::Int(i)]).collect();
        MaterializedCursor::new(vec![ColumnInfo::new("n", SqlType::Integer)], rows)
    }

    fn current(c: &MaterializedCursor) -> i64 {
        match c.value(0).unwrap() {
            NativeValue::Int(i) => i,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_next_walks_and_stops_after_last() {
        let mut c = cursor(2);
        assert_eq!(c.row().unwrap(), 0);
        assert!(c.next().unwrap());
        assert_eq!(current(&c), 1);
        assert!(c.next().unwrap());
        assert!(!c.next().unwrap());
        assert!(!c.next().unwrap());
        assert!(c.is_after_last().unwrap());
        assert_eq!(c.row().unwrap(), 0);
        assert!(c.value(0).is_err());
    }

    #[test]
    fn test_absolute_and_last() {
        let mut c = cursor(3);
        assert!(c.last().unwrap());
        assert_eq!(c.row().unwrap(), 3);
        assert!(c.absolute(2).unwrap());
        assert_eq!(current(&c), 2);
        assert!(!c.absolute(9).unwrap());
        assert!(c.is_after_last().unwrap());
        c.before_first().unwrap();
        assert!(c.next().unwrap());
        assert_eq!(current(&c), 1);
    }

    #[test]
    fn test_empty_cursor() {
        let mut c = cursor(0);
        assert!(!c.last().unwrap());
        assert!(!c.next().unwrap());
        assert!(!c.is_after_last().unwrap());
        assert_eq!(c.row().unwrap(), 0);
    }

    #[test]
    fn test_forward_only_rejects_scrolling() {
        let mut c = cursor(2).forward_only();
        let err = c.last().unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Unsupported);
        assert!(c.next().unwrap());
    }

    #[test]
    fn test_closed_cursor() {
        let mut c = cursor(1);
        c.close().unwrap();
        assert_eq!(c.next().unwrap_err().kind, DriverErrorKind::Closed);
    }

    #[test]
    fn test_failed_cell_is_reported() {
        let cols = vec![ColumnInfo::new("ts", SqlType::Timestamp)];
        let mut c = MaterializedCursor::from_cells(
            cols,
            vec![vec![Err(DriverError::conversion("bad timestamp"))]],
        );
        assert!(c.next().unwrap());
        assert_eq!(c.value(0).unwrap_err().kind, DriverErrorKind::Conversion);
    }
}
