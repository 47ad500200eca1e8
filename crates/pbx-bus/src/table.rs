use pbx_core::prelude::{Object, ObjectRef, Operation};

/// A typed 2-D array a message may carry as `userData`, backing
/// `getColumn`/`getRow`/`getResult` tabular access.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<Operation>>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    fn column_index(&self, col: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == col)
    }

    fn array_object(values: impl Iterator<Item = Operation>) -> ObjectRef {
        let array = Object::new(None, None);
        for (i, v) in values.enumerate() {
            array.set_field(&i.to_string(), v).expect("fresh array is never frozen");
        }
        array
    }

    /// `getColumn()`: `{ col1: [...], col2: [...], ... }`.
    pub fn column_map(&self) -> ObjectRef {
        let out = Object::new(None, None);
        for (idx, name) in self.columns.iter().enumerate() {
            let values = self.rows.iter().map(|r| r.get(idx).cloned().flatten().unwrap_or_else(Operation::null));
            out.set_field(name, Operation::object(Self::array_object(values))).unwrap();
        }
        out
    }

    /// `getColumn(c)`: a single column as an array, `c` by name or index.
    pub fn column(&self, selector: &str) -> Option<ObjectRef> {
        let idx = self.column_index(selector).or_else(|| selector.parse::<usize>().ok())?;
        if idx >= self.columns.len() {
            return None;
        }
        let values = self.rows.iter().map(|r| r.get(idx).cloned().flatten().unwrap_or_else(Operation::null));
        Some(Self::array_object(values))
    }

    /// `getRow()`: `[ {col1:v11, col2:v12}, ... ]`.
    pub fn row_list(&self) -> ObjectRef {
        let rows = self.rows.iter().map(|row| {
            let obj = Object::new(None, None);
            for (idx, name) in self.columns.iter().enumerate() {
                let v = row.get(idx).cloned().flatten().unwrap_or_else(Operation::null);
                obj.set_field(name, v).unwrap();
            }
            Operation::object(obj)
        });
        Self::array_object(rows)
    }

    /// `getRow(r)`: `{ col1: v1r, col2: v2r }` for that row index.
    pub fn row(&self, index: usize) -> Option<ObjectRef> {
        let row = self.rows.get(index)?;
        let obj = Object::new(None, None);
        for (idx, name) in self.columns.iter().enumerate() {
            let v = row.get(idx).cloned().flatten().unwrap_or_else(Operation::null);
            obj.set_field(name, v).unwrap();
        }
        Some(obj)
    }

    /// `getResult(r,c)`: a single cell, `null` out of range or missing.
    pub fn result(&self, row: usize, col: usize) -> Operation {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .cloned()
            .flatten()
            .unwrap_or_else(Operation::null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut t = Table::new(vec!["a".into(), "b".into()]);
        t.rows.push(vec![Some(Operation::integer(1)), Some(Operation::integer(2))]);
        t.rows.push(vec![Some(Operation::integer(3)), None]);
        t
    }

    #[test]
    fn column_by_name_and_index() {
        let t = sample();
        let by_name = t.column("a").unwrap();
        assert_eq!(by_name.get_field("0").unwrap().as_integer(), Some(1));
        let by_index = t.column("1").unwrap();
        assert_eq!(by_index.get_field("1").unwrap().is_null(), true);
    }

    #[test]
    fn row_by_index_and_missing_cell_is_null() {
        let t = sample();
        let row = t.row(1).unwrap();
        assert_eq!(row.get_field("a").unwrap().as_integer(), Some(3));
        assert!(row.get_field("b").unwrap().is_null());
    }

    #[test]
    fn result_out_of_range_is_null() {
        let t = sample();
        assert_eq!(t.result(0, 0).as_integer(), Some(1));
        assert!(t.result(5, 5).is_null());
    }
}
