use google_cloud_bigquery::http::table::{
    TableFieldMode, TableFieldSchema, TableFieldType, TableSchema,
};

/// Every entity table shares one layout: the record key, the block it belongs to,
/// and the serialized entity.
pub fn record_schema() -> TableSchema {
    TableSchema {
        fields: vec![
            TableFieldSchema {
                name: "id".to_string(),
                data_type: TableFieldType::String,
                mode: Some(TableFieldMode::Required),
                description: Some("Primary key of the entity".to_string()),
                ..Default::default()
            },
            TableFieldSchema {
                name: "block_number".to_string(),
                data_type: TableFieldType::Integer,
                mode: Some(TableFieldMode::Nullable),
                description: Some("Block the entity was extracted from".to_string()),
                ..Default::default()
            },
            TableFieldSchema {
                name: "data".to_string(),
                data_type: TableFieldType::Json,
                mode: Some(TableFieldMode::Required),
                description: Some("Serialized entity".to_string()),
                ..Default::default()
            },
        ],
    }
}
