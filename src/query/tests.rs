//! End-to-end filter scenarios over a small flights table.

use crate::data::{PrimType, Value};
use crate::heap::Heap;
use crate::query::engine::{FilterEngine, ResultField};
use crate::query::expr::{Expression, FilterOp, NormalForm, Rule};
use crate::table::schema::{ColumnSpec, TableLayout};
use crate::table::Table;
use std::sync::Arc;

struct Flight {
    origin: &'static str,
    dest: &'static str,
    passengers: i64,
    date: &'static str,
    distance: f64,
}

const FLIGHTS: [Flight; 3] = [
    Flight {
        origin: "SEA",
        dest: "SFO",
        passengers: 110,
        date: "2001-06-01",
        distance: 1089.0,
    },
    Flight {
        origin: "SEA",
        dest: "LAX",
        passengers: 110,
        date: "1999-12-31",
        distance: 1550.0,
    },
    Flight {
        origin: "MCO",
        dest: "JFK",
        passengers: 190,
        date: "2001-03-14",
        distance: 1080.0,
    },
];

fn flights_table(heap: &Arc<Heap>) -> Table {
    let specs = vec![
        ColumnSpec::bstr("origin", 4),
        ColumnSpec::bstr("dest", 4),
        ColumnSpec::new("passengers", PrimType::U32),
        ColumnSpec::bstr("date", 12),
        ColumnSpec::new("distance", PrimType::F32),
    ];
    let table = Table::create_in(heap, &specs, FLIGHTS.len(), TableLayout::RowMajor).unwrap();
    table.add_rows(FLIGHTS.len() as u32).unwrap();
    for (i, flight) in FLIGHTS.iter().enumerate() {
        let mut row = table.row(i as u32).unwrap();
        row.set_named("origin", &Value::from(flight.origin)).unwrap();
        row.set_named("dest", &Value::from(flight.dest)).unwrap();
        row.set_named("passengers", &Value::Int(flight.passengers)).unwrap();
        row.set_named("date", &Value::from(flight.date)).unwrap();
        row.set_named("distance", &Value::Float(flight.distance)).unwrap();
    }
    table
}

/// The two-clause expression shared by the normal-form scenarios:
/// `[[origin==SEA, passengers==110, dest!=LAX],
///   [origin==MCO, passengers>180, passengers<200, date CONTAINS "2001"]]`
fn two_clause_expression() -> Expression {
    Expression::new(vec![
        vec![
            Rule::new("origin", FilterOp::Equal, "SEA"),
            Rule::new("passengers", FilterOp::Equal, 110),
            Rule::new("dest", FilterOp::NotEqual, "LAX"),
        ],
        vec![
            Rule::new("origin", FilterOp::Equal, "MCO"),
            Rule::new("passengers", FilterOp::GreaterThan, 180),
            Rule::new("passengers", FilterOp::LessThan, 200),
            Rule::new("date", FilterOp::Contains, "2001"),
        ],
    ])
}

#[test]
fn test_dnf_two_clause_scan() {
    let heap = Heap::new(1024 * 1024).unwrap();
    let table = flights_table(&heap);

    let output = FilterEngine::new(&table)
        .run(&two_clause_expression(), NormalForm::Dnf)
        .unwrap();
    let proxy = output.into_proxy().unwrap();
    assert_eq!(proxy.source_indices().unwrap(), [0, 2]);
    proxy.destroy().unwrap();
}

#[test]
fn test_cnf_two_clause_scan() {
    let heap = Heap::new(1024 * 1024).unwrap();
    let table = flights_table(&heap);

    // Under AND-of-ORs every flight passes both clauses: each satisfies a
    // rule of clause one (SEA, or a non-LAX destination) and a rule of
    // clause two (every passenger count is below 200).
    let output = FilterEngine::new(&table)
        .run(&two_clause_expression(), NormalForm::Cnf)
        .unwrap();
    let proxy = output.into_proxy().unwrap();
    assert_eq!(proxy.source_indices().unwrap(), [0, 1, 2]);
    proxy.destroy().unwrap();

    // A CNF expression whose clauses cannot all hold comes back empty.
    let contradiction = Expression::new(vec![
        vec![Rule::new("origin", FilterOp::Equal, "SEA")],
        vec![Rule::new("origin", FilterOp::Equal, "MCO")],
    ]);
    let output = FilterEngine::new(&table)
        .run(&contradiction, NormalForm::Cnf)
        .unwrap();
    assert_eq!(output.row_count(), 0);
    output.destroy().unwrap();
}

#[test]
fn test_pure_projection() {
    let heap = Heap::new(1024 * 1024).unwrap();
    let table = flights_table(&heap);

    let output = FilterEngine::new(&table)
        .fields(vec![
            ResultField::column("dest"),
            ResultField::column("distance"),
        ])
        .run(&Expression::empty(), NormalForm::Dnf)
        .unwrap();
    let result = output.into_table().unwrap();
    assert_eq!(result.row_count(), 3);

    let mut seen: Vec<(String, f64)> = (0..3)
        .map(|k| {
            let row = result.row(k).unwrap();
            (
                row.get_named("dest").unwrap().as_str().unwrap().to_string(),
                row.get_named("distance").unwrap().as_float().unwrap(),
            )
        })
        .collect();
    seen.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        seen,
        [
            ("JFK".to_string(), 1080.0),
            ("LAX".to_string(), 1550.0),
            ("SFO".to_string(), 1089.0),
        ]
    );
    result.free().unwrap();
}

#[test]
fn test_proxy_projects_source_rows() {
    let heap = Heap::new(1024 * 1024).unwrap();
    let table = flights_table(&heap);

    let expr = Expression::new(vec![vec![Rule::new("distance", FilterOp::LessThan, 1100)]]);
    let output = FilterEngine::new(&table).run(&expr, NormalForm::Dnf).unwrap();
    let proxy = output.into_proxy().unwrap();
    assert_eq!(proxy.source_indices().unwrap(), [0, 2]);

    // The proxy presents the source schema, and every projected field
    // reads the same bytes as a direct cursor on the source row.
    assert_eq!(proxy.schema().column_count(), 5);
    for k in 0..proxy.row_count() {
        let through_proxy = proxy.row(k).unwrap();
        let direct = table.row(proxy.source_index(k).unwrap()).unwrap();
        for c in 0..proxy.schema().column_count() {
            assert_eq!(through_proxy.get(c).unwrap(), direct.get(c).unwrap());
        }
    }
    proxy.destroy().unwrap();
}

#[test]
fn test_refilter_is_idempotent() {
    let heap = Heap::new(1024 * 1024).unwrap();
    let table = flights_table(&heap);

    let expr = two_clause_expression();
    let first = FilterEngine::new(&table)
        .fields(vec![
            ResultField::RowIndex,
            ResultField::column("passengers"),
        ])
        .run(&expr, NormalForm::Dnf)
        .unwrap();
    let first = first.into_table().unwrap();

    // Filtering the result with the constant-true expression reproduces it
    // row for row.
    let second = FilterEngine::new(&first)
        .fields(vec![
            ResultField::column("row_index"),
            ResultField::column("passengers"),
        ])
        .run(&Expression::empty(), NormalForm::Dnf)
        .unwrap();
    let second = second.into_table().unwrap();

    assert_eq!(second.row_count(), first.row_count());
    for k in 0..first.row_count() {
        let a = first.row(k).unwrap();
        let b = second.row(k).unwrap();
        assert_eq!(a.get_named("row_index").unwrap(), b.get_named("row_index").unwrap());
        assert_eq!(a.get_named("passengers").unwrap(), b.get_named("passengers").unwrap());
    }

    second.free().unwrap();
    first.free().unwrap();
}

#[test]
fn test_wire_expression_end_to_end() {
    let heap = Heap::new(1024 * 1024).unwrap();
    let table = flights_table(&heap);

    let expr = Expression::from_json(
        r#"[[{"field": "origin", "operation": "EQUAL", "value": "SEA"},
             {"field": "dest", "operation": "NOT_EQUAL", "value": "LAX"}]]"#,
    )
    .unwrap();
    let output = FilterEngine::new(&table).run(&expr, NormalForm::Dnf).unwrap();
    assert_eq!(output.as_proxy().unwrap().source_indices().unwrap(), [0]);
    output.destroy().unwrap();
}

#[test]
fn test_column_major_source_end_to_end() {
    let heap = Heap::new(1024 * 1024).unwrap();
    let specs = vec![
        ColumnSpec::bstr("origin", 4),
        ColumnSpec::new("passengers", PrimType::U32),
    ];
    let table = Table::create_in(&heap, &specs, 3, TableLayout::ColumnMajor).unwrap();
    for (i, flight) in FLIGHTS.iter().enumerate() {
        let mut row = table.row(i as u32).unwrap();
        row.set_named("origin", &Value::from(flight.origin)).unwrap();
        row.set_named("passengers", &Value::Int(flight.passengers)).unwrap();
    }

    let expr = Expression::new(vec![vec![Rule::new("origin", FilterOp::Equal, "SEA")]]);
    let output = FilterEngine::new(&table).run(&expr, NormalForm::Dnf).unwrap();
    assert_eq!(output.as_proxy().unwrap().source_indices().unwrap(), [0, 1]);
    output.destroy().unwrap();
}
