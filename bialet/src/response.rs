//! `Response`, and C5: the file-backed response resolver.

use crate::db::Db;
use crate::pages;

/// The in-band marker byte (SUB / EOF control) that, as the first byte of a
/// script's returned body, means "the rest of this string is a
/// `BIALET_FILES.id`; stream that blob instead."
pub const FILE_SENTINEL: u8 = 0x1A;

/// Produced by the script runtime driver (C4) and consumed by the HTTP
/// writer.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub header: Option<String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new() -> Response {
        Response {
            status: 200,
            header: None,
            body: Vec::new(),
        }
    }

    pub fn with_status(status: u16, body: impl Into<Vec<u8>>) -> Response {
        Response {
            status,
            header: None,
            body: body.into(),
        }
    }

    pub fn html(status: u16, body: String) -> Response {
        Response {
            status,
            header: Some("Content-Type: text/html; charset=UTF-8\r\n".to_string()),
            body: body.into_bytes(),
        }
    }
}

impl Default for Response {
    fn default() -> Response {
        Response::new()
    }
}

/// C5: if `body`'s first byte is [`FILE_SENTINEL`], the remainder is a
/// `BIALET_FILES.id`; look it up and substitute the blob bytes. Otherwise
/// `body` passes through unchanged. `Err` means the id was not found in
/// `BIALET_FILES`; the caller must force a 500, not trust whatever status
/// the script set.
pub fn resolve_file_sentinel(db: &Db, body: Vec<u8>) -> Result<Vec<u8>, Vec<u8>> {
    let Some((&first, rest)) = body.split_first() else {
        return Ok(body);
    };

    if first != FILE_SENTINEL {
        return Ok(body);
    }

    let id = String::from_utf8_lossy(rest);
    match db.file_blob(&id) {
        Some(blob) => Ok(blob),
        None => {
            log::error!("file sentinel id '{id}' not found in BIALET_FILES");
            Err(pages::internal_server_error().into_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_sentinel_body_passes_through() {
        let db = Db::open_in_memory();
        assert_eq!(resolve_file_sentinel(&db, b"hi".to_vec()).unwrap(), b"hi".to_vec());
    }

    #[test]
    fn sentinel_body_resolves_to_blob() {
        let db = Db::open_in_memory();
        db.insert_test_blob("logo", &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);

        let mut marker = vec![FILE_SENTINEL];
        marker.extend_from_slice(b"logo");

        let resolved = resolve_file_sentinel(&db, marker).unwrap();
        assert_eq!(resolved.len(), 8);
        assert_eq!(resolved[0], 0x89);
    }

    #[test]
    fn missing_blob_id_yields_error_page() {
        let db = Db::open_in_memory();
        let mut marker = vec![FILE_SENTINEL];
        marker.extend_from_slice(b"missing");
        let resolved = resolve_file_sentinel(&db, marker).unwrap_err();
        assert!(String::from_utf8_lossy(&resolved).contains("Internal Server Error"));
    }
}
