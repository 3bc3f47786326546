//! Response shapes shared by handlers.

use axum::http::header;
use axum::response::{IntoResponse, Response};
use ontask_core::export::{content_disposition, CSV_CONTENT_TYPE};
use serde::Serialize;

/// `{ "data": T }` envelope for collections.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// A CSV body served as a file download.
pub struct CsvDownload(pub String);

impl IntoResponse for CsvDownload {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, CSV_CONTENT_TYPE.to_string()),
                (header::CONTENT_DISPOSITION, content_disposition()),
            ],
            self.0,
        )
            .into_response()
    }
}
