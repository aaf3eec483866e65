pub mod fields;
pub mod filters;
pub mod transforms;

pub use fields::{
    map_record, payload_to_json, reverse_map, validate_rules, ExternalPayload, MappingError,
};
pub use filters::{
    compile_filters, evaluate, matches_all, CompiledFilter, FilterError, FilterOperator,
};
pub use transforms::{apply_transform, TransformError};
