// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory tabular query results. Every cell is text, as returned by the
//! query service, and may be null.

/// Rows of text cells with named columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl Table {
    #[must_use]
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from literal rows; handy for fixtures
    #[must_use]
    pub fn from_rows<C, R>(columns: &[C], rows: &[R]) -> Self
    where
        C: AsRef<str>,
        R: AsRef<[&'static str]>,
    {
        let mut table = Self::new(columns.iter().map(|c| c.as_ref().to_string()).collect());
        for row in rows {
            table.push_row(row.as_ref().iter().map(|v| Some((*v).to_string())).collect());
        }
        table
    }

    /// Append one row. Short rows are padded with nulls and long rows are
    /// truncated so every row matches the column count.
    pub fn push_row(&mut self, mut row: Vec<Option<String>>) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    pub fn extend_rows<I>(&mut self, rows: I)
    where
        I: IntoIterator<Item = Vec<Option<String>>>,
    {
        for row in rows {
            self.push_row(row);
        }
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, matched case-insensitively
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Cell value, `None` for null cells or out-of-range positions
    #[must_use]
    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|v| v.as_deref())
    }
}
