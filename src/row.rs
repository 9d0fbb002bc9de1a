//! Name-addressable result rows.

use crate::{record::FieldType, LoaderError, Result, Value};

/// One result row with its column names.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    cols: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(cols: Vec<String>, values: Vec<Value>) -> Self {
        Self { cols, values }
    }

    pub(crate) fn from_sqlite(cols: &[String], row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let values = (0..cols.len())
            .map(|index| row.get::<_, Value>(index))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Self {
            cols: cols.to_vec(),
            values,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.cols
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns a value by case-insensitive column name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let idx = self
            .cols
            .iter()
            .position(|col| col.eq_ignore_ascii_case(name))?;
        self.values.get(idx)
    }

    /// Converts the named column into a record field type.
    ///
    /// A missing column reads as `NULL`, so optional fields tolerate
    /// projections that leave them out.
    pub fn field<T: FieldType>(&self, name: &str) -> Result<T> {
        let value = self.get(name).cloned().unwrap_or(Value::Null);
        T::from_value(value).map_err(|reason| {
            LoaderError::Schema(format!("column '{name}': {reason}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Row;
    use crate::{LoaderError, Value};

    fn row() -> Row {
        Row::new(
            vec!["Id".to_owned(), "Name".to_owned()],
            vec![Value::integer(3), Value::text("Kit")],
        )
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(row().get("id"), Some(&Value::Integer(3)));
        assert_eq!(row().get("NAME"), Some(&Value::Text("Kit".to_owned())));
        assert_eq!(row().get("missing"), None);
    }

    #[test]
    fn typed_field_access() {
        let row = row();
        assert_eq!(row.field::<i64>("id").expect("must convert"), 3);
        assert_eq!(row.field::<Option<String>>("absent").expect("must convert"), None);
        let err = row.field::<i64>("name").expect_err("must fail");
        assert!(matches!(err, LoaderError::Schema(_)));
    }
}
