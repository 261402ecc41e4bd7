//! FILENAME: core/pivot-engine/src/engine.rs
//! Pivot Engine - The calculation core that reshapes source rows.
//!
//! This module takes a PivotModel (configuration) and the source rows and
//! columns, and produces PivotedData (derived columns, rows and column
//! groups) that can be fed straight back into a grid engine.
//!
//! Algorithm:
//! 1. Validate the active fields against the source columns and functions
//! 2. Collect the row axis (distinct row-field combinations, first appearance)
//! 3. Build the column axis tree and sort each level by its field direction
//! 4. Bucket source rows by (row item, column leaf)
//! 5. Aggregate every bucket into the derived cells

use grid_engine::aggregation::can_column_have_aggregation_function;
use grid_engine::value::ValueKey;
use grid_engine::{
    AggregationFunction, AggregationFunctions, CellValue, ColumnDef, ColumnType, GridError, GridResult,
    RowModel,
};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::definition::{
    escape_path_segment, pivot_column_field, ColumnGroupNode, PivotColumnField, PivotColumnGroup, PivotModel,
    PivotSortDirection, PivotValueField, PivotedData, COLUMN_PATH_SEPARATOR,
};

/// Prefix of the ids given to derived rows.
pub const PIVOT_ROW_ID_PREFIX: &str = "pivot/";

/// Id of the single derived row produced when no row field is active.
pub const PIVOT_TOTAL_ROW_ID: &str = "pivot/total";

type GroupKey = SmallVec<[ValueKey; 4]>;

// ============================================================================
// PIVOT SOURCE
// ============================================================================

/// The data a pivot is computed from.
#[derive(Debug, Clone, Copy)]
pub struct PivotSource<'a> {
    pub rows: &'a [RowModel],
    pub columns: &'a [ColumnDef],
    /// Field the derived row ids are written to.
    pub row_id_field: &'a str,
}

// ============================================================================
// AXIS STRUCTURES
// ============================================================================

/// A node in the column axis tree.
/// Each node represents a distinct value of one column field.
#[derive(Debug)]
struct AxisNode {
    key: ValueKey,
    value: CellValue,
    /// Escaped label, unique among the siblings. Used in derived field names.
    segment: String,
    children: Vec<AxisNode>,
    child_index: FxHashMap<ValueKey, usize>,
}

impl AxisNode {
    fn new(key: ValueKey, value: CellValue) -> Self {
        AxisNode {
            key,
            value,
            segment: String::new(),
            children: Vec::new(),
            child_index: FxHashMap::default(),
        }
    }

    fn root() -> Self {
        Self::new(ValueKey::Empty, CellValue::Empty)
    }

    fn child_mut(&mut self, value: &CellValue) -> &mut AxisNode {
        let key = ValueKey::from(value);
        let index = match self.child_index.get(&key) {
            Some(index) => *index,
            None => {
                let index = self.children.len();
                self.child_index.insert(key.clone(), index);
                self.children.push(AxisNode::new(key, value.clone()));
                index
            }
        };
        &mut self.children[index]
    }

    /// Sorts every level by its field direction. Stable, so values of
    /// unsorted levels keep their order of first appearance.
    fn sort(&mut self, fields: &[&PivotColumnField]) {
        let Some((field, rest)) = fields.split_first() else {
            return;
        };
        match field.sort {
            Some(PivotSortDirection::Asc) => self.children.sort_by(|a, b| CellValue::compare(&a.value, &b.value)),
            Some(PivotSortDirection::Desc) => self.children.sort_by(|a, b| CellValue::compare(&b.value, &a.value)),
            None => {}
        }
        self.child_index.clear();
        for child in self.children.iter_mut() {
            child.sort(rest);
        }
    }

    /// Gives the children their field segments, in display order. Values
    /// with the same label (`1` and `"1"`) keep apart through a suffix.
    fn assign_segments(&mut self) {
        let mut taken = FxHashSet::default();
        for child in self.children.iter_mut() {
            let label = escape_path_segment(&child.value.display_value(), '>');
            child.segment = unique_name(&mut taken, label);
            child.assign_segments();
        }
    }
}

/// `base`, or `base~2`, `base~3`... for the first one not taken yet.
fn unique_name(taken: &mut FxHashSet<String>, base: String) -> String {
    if !taken.contains(&base) {
        taken.insert(base.clone());
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}~{}", base, n);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// A leaf of the column axis: one full column-field combination.
#[derive(Debug, Clone, Default)]
struct ColumnLeaf {
    key: GroupKey,
    /// Field segments, see `AxisNode::segment`.
    path: Vec<String>,
    /// Display labels for headers.
    labels: Vec<String>,
}

fn collect_leaves(node: &AxisNode, current: &mut ColumnLeaf, leaves: &mut Vec<ColumnLeaf>) {
    if node.children.is_empty() {
        leaves.push(current.clone());
        return;
    }
    for child in &node.children {
        current.key.push(child.key.clone());
        current.path.push(child.segment.clone());
        current.labels.push(child.value.display_value());
        collect_leaves(child, current, leaves);
        current.key.pop();
        current.path.pop();
        current.labels.pop();
    }
}

fn build_column_groups(node: &AxisNode, path: &mut Vec<String>, value_fields: &[String]) -> Vec<ColumnGroupNode> {
    if node.children.is_empty() {
        return value_fields
            .iter()
            .map(|value_field| ColumnGroupNode::Field(pivot_column_field(path, value_field)))
            .collect();
    }
    node.children
        .iter()
        .map(|child| {
            let header_name = child.value.display_value();
            path.push(child.segment.clone());
            let group = PivotColumnGroup {
                group_id: path.join(COLUMN_PATH_SEPARATOR),
                header_name,
                children: build_column_groups(child, path, value_fields),
            };
            path.pop();
            ColumnGroupNode::Group(group)
        })
        .collect()
}

// ============================================================================
// PIVOT CALCULATOR
// ============================================================================

struct ValueSpec<'a> {
    field: &'a PivotValueField,
    column: &'a ColumnDef,
    function: &'a AggregationFunction,
}

/// The main calculation engine for pivot transforms.
struct PivotCalculator<'a> {
    source: &'a PivotSource<'a>,
    row_fields: Vec<&'a str>,
    column_fields: Vec<&'a PivotColumnField>,
    values: Vec<ValueSpec<'a>>,
}

impl<'a> PivotCalculator<'a> {
    /// Resolves the active fields. Every field is checked before anything
    /// is computed.
    fn new(
        source: &'a PivotSource<'a>,
        model: &'a PivotModel,
        functions: &'a AggregationFunctions,
    ) -> GridResult<Self> {
        let find_column = |field: &str| -> GridResult<&'a ColumnDef> {
            source
                .columns
                .iter()
                .find(|c| c.field == field)
                .ok_or_else(|| GridError::MissingColumn(field.to_string()))
        };

        let mut row_fields = Vec::new();
        for field in model.active_rows() {
            find_column(&field.field)?;
            row_fields.push(field.field.as_str());
        }

        let mut column_fields = Vec::new();
        for field in model.active_columns() {
            find_column(&field.field)?;
            column_fields.push(field);
        }

        let mut values = Vec::new();
        for field in model.active_values() {
            let column = find_column(&field.field)?;
            let function = functions.get(&field.agg_func).ok_or_else(|| {
                GridError::Configuration(format!(
                    "Unknown aggregation function \"{}\" for pivot value \"{}\"",
                    field.agg_func, field.field
                ))
            })?;
            if !can_column_have_aggregation_function(Some(column), &field.agg_func, Some(function)) {
                return Err(GridError::Configuration(format!(
                    "Aggregation function \"{}\" cannot be applied to pivot value \"{}\"",
                    field.agg_func, field.field
                )));
            }
            values.push(ValueSpec { field, column, function });
        }

        Ok(PivotCalculator {
            source,
            row_fields,
            column_fields,
            values,
        })
    }

    fn row_key(&self, row: &RowModel) -> GroupKey {
        self.row_fields.iter().map(|field| ValueKey::from(row.get(field))).collect()
    }

    fn column_key(&self, row: &RowModel) -> GroupKey {
        self.column_fields
            .iter()
            .map(|field| ValueKey::from(row.get(&field.field)))
            .collect()
    }

    fn calculate(&self) -> PivotedData {
        // Row axis: first appearance order.
        let mut row_items: Vec<&RowModel> = Vec::new();
        let mut row_index: FxHashMap<GroupKey, usize> = FxHashMap::default();

        // Column axis.
        let mut column_root = AxisNode::root();

        let mut placements: Vec<(usize, GroupKey)> = Vec::with_capacity(self.source.rows.len());
        for row in self.source.rows {
            let key = self.row_key(row);
            let index = match row_index.get(&key) {
                Some(index) => *index,
                None => {
                    row_index.insert(key, row_items.len());
                    row_items.push(row);
                    row_items.len() - 1
                }
            };

            let mut node = &mut column_root;
            for field in &self.column_fields {
                node = node.child_mut(row.get(&field.field));
            }
            placements.push((index, self.column_key(row)));
        }

        column_root.sort(&self.column_fields);
        column_root.assign_segments();
        let mut leaves = Vec::new();
        // With column fields but no source rows there is no combination at all.
        if self.column_fields.is_empty() || !column_root.children.is_empty() {
            collect_leaves(&column_root, &mut ColumnLeaf::default(), &mut leaves);
        }

        let leaf_index: FxHashMap<&GroupKey, usize> =
            leaves.iter().enumerate().map(|(i, leaf)| (&leaf.key, i)).collect();

        // Cross-tabulate: source row indexes per (row item, column leaf).
        let mut buckets: FxHashMap<(usize, usize), Vec<usize>> = FxHashMap::default();
        for (source_index, (row_item, column_key)) in placements.iter().enumerate() {
            if let Some(leaf) = leaf_index.get(column_key) {
                buckets.entry((*row_item, *leaf)).or_default().push(source_index);
            }
        }

        let value_fields: Vec<String> = self.values.iter().map(|v| v.field.field.clone()).collect();
        let columns = self.derived_columns(&leaves);
        let mut taken_ids = FxHashSet::default();
        let rows = row_items
            .iter()
            .enumerate()
            .map(|(row_item, first)| {
                let id = unique_name(&mut taken_ids, self.derived_row_id(first));
                self.derived_row(row_item, first, id, &leaves, &buckets)
            })
            .collect();
        let column_groups = if self.column_fields.is_empty() {
            Vec::new()
        } else {
            build_column_groups(&column_root, &mut Vec::new(), &value_fields)
                .into_iter()
                .filter_map(|node| match node {
                    ColumnGroupNode::Group(group) => Some(group),
                    ColumnGroupNode::Field(_) => None,
                })
                .collect()
        };

        PivotedData {
            columns,
            rows,
            column_groups,
        }
    }

    fn derived_columns(&self, leaves: &[ColumnLeaf]) -> Vec<ColumnDef> {
        let mut columns: Vec<ColumnDef> = self
            .row_fields
            .iter()
            .filter_map(|field| self.source.columns.iter().find(|c| c.field == *field))
            .map(|column| {
                let mut column = column.clone();
                column.aggregation = None;
                column.hide = false;
                column
            })
            .collect();

        for leaf in leaves {
            for value in &self.values {
                let field = pivot_column_field(&leaf.path, &value.field.field);
                let column_type = match value.field.agg_func.as_str() {
                    "size" | "sum" | "avg" => ColumnType::Number,
                    _ => value.column.column_type,
                };
                let header_name = if leaf.labels.is_empty() {
                    value.column.display_name().to_string()
                } else {
                    format!("{} ({})", value.column.display_name(), leaf.labels.join(" / "))
                };
                let mut column = ColumnDef::new(field).with_type(column_type).with_header_name(header_name);
                column.width = value.column.width;
                // Derived cells are already aggregated.
                column.aggregable = false;
                columns.push(column);
            }
        }
        columns
    }

    fn derived_row(
        &self,
        row_item: usize,
        first: &RowModel,
        id: String,
        leaves: &[ColumnLeaf],
        buckets: &FxHashMap<(usize, usize), Vec<usize>>,
    ) -> RowModel {
        let mut row = RowModel::new();
        for field in &self.row_fields {
            row.set(*field, first.get(field).clone());
        }

        for (leaf_index, leaf) in leaves.iter().enumerate() {
            let matching = buckets.get(&(row_item, leaf_index));
            for value in &self.values {
                let field = pivot_column_field(&leaf.path, &value.field.field);
                let cell = match matching {
                    Some(indexes) => {
                        let values: Vec<CellValue> = indexes
                            .iter()
                            .map(|i| self.source.rows[*i].get(&value.field.field).clone())
                            .collect();
                        value.function.apply(&values)
                    }
                    None => CellValue::Empty,
                };
                row.set(field, cell);
            }
        }
        // Written last so a same-named derived field cannot clobber the id.
        row.set(self.source.row_id_field, CellValue::Text(id));
        row
    }

    /// Derived ids never carry the auto-generated prefix, so derived rows
    /// count as data rows. Labels are escaped; callers dedupe same-label keys.
    fn derived_row_id(&self, first: &RowModel) -> String {
        if self.row_fields.is_empty() {
            return PIVOT_TOTAL_ROW_ID.to_string();
        }
        let labels: Vec<String> = self
            .row_fields
            .iter()
            .map(|f| escape_path_segment(&first.get(f).display_value(), '/'))
            .collect();
        format!("{}{}", PIVOT_ROW_ID_PREFIX, labels.join("/"))
    }
}

// ============================================================================
// PUBLIC API
// ============================================================================

/// Calculates the pivoted columns, rows and column groups.
/// Pure: the same inputs always give the same output.
pub fn calculate_pivot(
    source: &PivotSource<'_>,
    model: &PivotModel,
    functions: &AggregationFunctions,
) -> GridResult<PivotedData> {
    let calculator = PivotCalculator::new(source, model, functions)?;
    Ok(calculator.calculate())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{PivotRowField, PivotValueField};

    fn sales_rows() -> Vec<RowModel> {
        vec![
            RowModel::new().with("id", 1).with("cat", "A").with("y", 2023).with("price", 10),
            RowModel::new().with("id", 2).with("cat", "A").with("y", 2024).with("price", 20),
            RowModel::new().with("id", 3).with("cat", "B").with("y", 2023).with("price", 5),
        ]
    }

    fn sales_columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id").with_type(ColumnType::Number),
            ColumnDef::new("cat"),
            ColumnDef::new("y").with_type(ColumnType::Number),
            ColumnDef::new("price").with_type(ColumnType::Number),
        ]
    }

    fn sales_model() -> PivotModel {
        PivotModel::new()
            .with_row(PivotRowField::new("cat"))
            .with_column(PivotColumnField::new("y"))
            .with_value(PivotValueField::new("price", "sum"))
    }

    fn pivot(rows: &[RowModel], model: &PivotModel) -> GridResult<PivotedData> {
        let columns = sales_columns();
        let source = PivotSource {
            rows,
            columns: &columns,
            row_id_field: "id",
        };
        calculate_pivot(&source, model, &AggregationFunctions::builtin())
    }

    fn fields(data: &PivotedData) -> Vec<&str> {
        data.columns.iter().map(|c| c.field.as_str()).collect()
    }

    fn row<'d>(data: &'d PivotedData, id: &str) -> &'d RowModel {
        data.rows
            .iter()
            .find(|r| r.get("id") == &CellValue::text(id))
            .unwrap()
    }

    #[test]
    fn test_reshape() {
        let data = pivot(&sales_rows(), &sales_model()).unwrap();

        assert_eq!(fields(&data), vec!["cat", "2023>->price", "2024>->price"]);
        assert_eq!(data.rows.len(), 2);
        assert_eq!(row(&data, "pivot/A").get("cat"), &CellValue::text("A"));
        assert_eq!(row(&data, "pivot/A").get("2023>->price"), &CellValue::Number(10.0));
        assert_eq!(row(&data, "pivot/A").get("2024>->price"), &CellValue::Number(20.0));
        assert_eq!(row(&data, "pivot/B").get("2023>->price"), &CellValue::Number(5.0));
        assert_eq!(row(&data, "pivot/B").get("2024>->price"), &CellValue::Empty);
    }

    #[test]
    fn test_column_sort_direction() {
        let mut model = sales_model();
        model.columns[0].sort = Some(PivotSortDirection::Desc);
        let data = pivot(&sales_rows(), &model).unwrap();
        assert_eq!(fields(&data), vec!["cat", "2024>->price", "2023>->price"]);
    }

    #[test]
    fn test_nested_columns_are_lexicographic() {
        let rows = vec![
            RowModel::new().with("id", 1).with("cat", "B").with("y", 2024).with("price", 1),
            RowModel::new().with("id", 2).with("cat", "A").with("y", 2023).with("price", 2),
            RowModel::new().with("id", 3).with("cat", "A").with("y", 2024).with("price", 3),
        ];
        let model = PivotModel::new()
            .with_column(PivotColumnField::new("cat").sorted(PivotSortDirection::Asc))
            .with_column(PivotColumnField::new("y"))
            .with_value(PivotValueField::new("price", "sum"));
        let data = pivot(&rows, &model).unwrap();

        // "y" has no direction: first appearance under each "cat".
        assert_eq!(
            fields(&data),
            vec!["A>->2023>->price", "A>->2024>->price", "B>->2024>->price"]
        );
        assert_eq!(data.rows.len(), 1);
        assert_eq!(data.rows[0].get("id"), &CellValue::text(PIVOT_TOTAL_ROW_ID));

        assert_eq!(data.column_groups.len(), 2);
        let a = &data.column_groups[0];
        assert_eq!(a.group_id, "A");
        assert_eq!(a.children.len(), 2);
        match &a.children[1] {
            ColumnGroupNode::Group(group) => {
                assert_eq!(group.group_id, "A>->2024");
                assert_eq!(group.header_name, "2024");
                assert_eq!(group.children, vec![ColumnGroupNode::Field("A>->2024>->price".to_string())]);
            }
            other => panic!("expected group, got {:?}", other),
        }
    }

    #[test]
    fn test_same_label_values_stay_apart() {
        let rows = vec![
            RowModel::new().with("id", 1).with("cat", 1).with("y", 1).with("price", 10),
            RowModel::new().with("id", 2).with("cat", "1").with("y", "1").with("price", 20),
        ];
        let data = pivot(&rows, &sales_model()).unwrap();

        assert_eq!(fields(&data), vec!["cat", "1>->price", "1~2>->price"]);
        assert_eq!(data.rows.len(), 2);
        assert_eq!(row(&data, "pivot/1").get("cat"), &CellValue::Number(1.0));
        assert_eq!(row(&data, "pivot/1").get("1>->price"), &CellValue::Number(10.0));
        assert_eq!(row(&data, "pivot/1~2").get("cat"), &CellValue::text("1"));
        assert_eq!(row(&data, "pivot/1~2").get("1~2>->price"), &CellValue::Number(20.0));
        assert_eq!(row(&data, "pivot/1~2").get("1>->price"), &CellValue::Empty);
    }

    #[test]
    fn test_separators_in_labels_are_escaped() {
        let rows = vec![
            RowModel::new().with("id", 1).with("cat", "A/B").with("y", "C").with("price", 1),
            RowModel::new().with("id", 2).with("cat", "A").with("y", "B/C").with("price", 2),
        ];
        let model = PivotModel::new()
            .with_row(PivotRowField::new("cat"))
            .with_row(PivotRowField::new("y"))
            .with_value(PivotValueField::new("price", "sum"));
        let data = pivot(&rows, &model).unwrap();

        assert_eq!(row(&data, "pivot/A\\/B/C").get("price"), &CellValue::Number(1.0));
        assert_eq!(row(&data, "pivot/A/B\\/C").get("price"), &CellValue::Number(2.0));

        let rows = vec![
            RowModel::new().with("id", 1).with("cat", "A>->B").with("y", "x").with("price", 1),
            RowModel::new().with("id", 2).with("cat", "A").with("y", "B>->x").with("price", 2),
        ];
        let model = PivotModel::new()
            .with_column(PivotColumnField::new("cat"))
            .with_column(PivotColumnField::new("y"))
            .with_value(PivotValueField::new("price", "sum"));
        let data = pivot(&rows, &model).unwrap();

        assert_eq!(fields(&data), vec!["A\\>->B>->x>->price", "A>->B\\>->x>->price"]);
        assert_eq!(data.column_groups[0].header_name, "A>->B");
        assert_eq!(data.rows[0].get("A>->B\\>->x>->price"), &CellValue::Number(2.0));
    }

    #[test]
    fn test_values_without_column_fields() {
        let model = PivotModel::new()
            .with_row(PivotRowField::new("cat"))
            .with_value(PivotValueField::new("price", "avg"))
            .with_value(PivotValueField::new("y", "size"));
        let data = pivot(&sales_rows(), &model).unwrap();

        assert_eq!(fields(&data), vec!["cat", "price", "y"]);
        assert_eq!(row(&data, "pivot/A").get("price"), &CellValue::Number(15.0));
        assert_eq!(row(&data, "pivot/A").get("y"), &CellValue::Number(2.0));
        assert!(data.column_groups.is_empty());
    }

    #[test]
    fn test_hidden_fields_are_skipped() {
        let mut model = sales_model();
        model.columns[0].hidden = true;
        let data = pivot(&sales_rows(), &model).unwrap();
        assert_eq!(fields(&data), vec!["cat", "price"]);
        assert_eq!(row(&data, "pivot/A").get("price"), &CellValue::Number(30.0));
    }

    #[test]
    fn test_unknown_field() {
        let model = sales_model().with_row(PivotRowField::new("ghost"));
        assert!(matches!(pivot(&sales_rows(), &model), Err(GridError::MissingColumn(f)) if f == "ghost"));
    }

    #[test]
    fn test_inapplicable_function() {
        let model = PivotModel::new()
            .with_row(PivotRowField::new("y"))
            .with_value(PivotValueField::new("cat", "sum"));
        assert!(matches!(pivot(&sales_rows(), &model), Err(GridError::Configuration(_))));

        let model = PivotModel::new().with_value(PivotValueField::new("price", "median"));
        assert!(matches!(pivot(&sales_rows(), &model), Err(GridError::Configuration(_))));
    }

    #[test]
    fn test_no_source_rows() {
        let data = pivot(&[], &sales_model()).unwrap();
        assert!(data.rows.is_empty());
        assert_eq!(fields(&data), vec!["cat"]);
    }
}
