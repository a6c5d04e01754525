/// Data layer: core types, loading, filtering and grouping.
///
/// Architecture:
/// ```text
///  .csv / .json / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → BiomarkerDataset
///   └──────────┘
///        │
///        ▼
///   ┌──────────────────┐
///   │ BiomarkerDataset │  Schema, Vec<Row>, cached metadata
///   └──────────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  var:level predicates, value scale
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ grouping  │  disaggregate into series, paginate subjects
///   └──────────┘
/// ```
pub mod filter;
pub mod grouping;
pub mod loader;
pub mod model;
