//! Source type resolution
//!
//! Metadata records describe physical columns with numeric remote-type codes (OLE DB
//! type identifiers). The codes fall into five buckets.

use super::attributes::{AttributeResolver, specs};
use super::tree::XmlNode;
use crate::models::DataType;

/// Map a remote-type code to its target type bucket
pub fn remote_type_category(code: i64) -> Option<DataType> {
    match code {
        // BSTR, CHAR, WCHAR, VARCHAR, LONGVARCHAR, VARWCHAR, LONGVARWCHAR, GUID
        8 | 72 | 129 | 130 | 200 | 201 | 202 | 203 => Some(DataType::String),
        // SINGLE, DOUBLE, CURRENCY, DECIMAL, NUMERIC, VARNUMERIC
        4 | 5 | 6 | 14 | 131 | 139 => Some(DataType::Double),
        // SMALLINT, INTEGER, TINYINT, UNSIGNED*, BIGINT
        2 | 3 | 16 | 17 | 18 | 19 | 20 | 21 => Some(DataType::Int64),
        // DATE, DBDATE, DBTIME, DBTIMESTAMP, FILETIME
        7 | 64 | 133 | 134 | 135 => Some(DataType::DateTime),
        // BOOL
        11 => Some(DataType::Boolean),
        _ => None,
    }
}

/// Resolve the type of a metadata record.
///
/// Precedence: explicit `local-type` text, the remote-type code table, the raw `type`
/// attribute, then `string`.
pub fn metadata_record_type(record: &XmlNode) -> DataType {
    AttributeResolver::datatype(record, &specs::LOCAL_TYPE)
        .or_else(|| AttributeResolver::datatype(record, &specs::REMOTE_TYPE))
        .or_else(|| AttributeResolver::datatype(record, &specs::RAW_TYPE))
        .unwrap_or_default()
}
