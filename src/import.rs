//! Bulk request import from CSV text.
//!
//! Expected header: `url,file_path,group_id,name`, optionally preceded by an
//! `id` column. Rows without an explicit id get one derived from their url
//! and destination.

use std::sync::Arc;

use crate::download::controller::QueueController;
use crate::download::listener::EnqueueCallback;
use crate::error::FetchError;
use crate::models::Request;

pub fn parse_requests_csv(csv_text: &str) -> Result<Vec<Request>, FetchError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .has_headers(true)
        .from_reader(csv_text.as_bytes());

    let headers = rdr.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let has_id = headers.get(0).is_some_and(|h| h.eq_ignore_ascii_case("id"));
    let offset = usize::from(has_id);
    let url_col = column("url").unwrap_or(offset);
    let path_col = column("file_path").unwrap_or(offset + 1);
    let group_col = column("group_id").unwrap_or(offset + 2);
    let name_col = column("name").unwrap_or(offset + 3);

    let mut requests = Vec::new();
    for (line, rec) in rdr.records().enumerate() {
        let rec = rec?;
        let url = rec.get(url_col).unwrap_or("");
        if url.is_empty() {
            tracing::debug!(line = line + 2, "skipping csv row without url");
            continue;
        }
        let file_path = rec.get(path_col).unwrap_or("");

        let explicit_id = if has_id { rec.get(0).filter(|s| !s.is_empty()) } else { None };
        let request = match explicit_id {
            Some(raw) => {
                let id = raw.parse::<i64>().map_err(|e| FetchError::InvalidRequest {
                    id: 0,
                    reason: format!("row {}: bad id '{raw}': {e}", line + 2),
                })?;
                Request::with_id(id, url, file_path)
            }
            None => Request::new(url, file_path),
        };

        requests.push(
            request
                .group(rec.get(group_col).unwrap_or(""))
                .name(rec.get(name_col).unwrap_or("")),
        );
    }
    Ok(requests)
}

/// Parse `csv_text` and enqueue every row as one batch. Returns how many
/// requests were submitted; per-request outcomes go to `callback`.
pub fn import_csv(
    controller: &QueueController,
    csv_text: &str,
    callback: Option<Arc<dyn EnqueueCallback>>,
) -> Result<usize, FetchError> {
    let requests = parse_requests_csv(csv_text)?;
    let count = requests.len();
    controller.enqueue_batch(requests, callback)?;
    tracing::info!(count, "csv import submitted");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::derive_id;

    #[test]
    fn parses_rows_and_skips_empty_urls() {
        let text = "url,file_path,group_id,name\n\
                    https://a.test/1 , /data/1.bin , g , first\n\
                    ,/data/skip.bin,g,skip\n\
                    https://a.test/2,/data/2.bin,,\n";

        let requests = parse_requests_csv(text).unwrap();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url, "https://a.test/1");
        assert_eq!(requests[0].file_path, "/data/1.bin");
        assert_eq!(requests[0].group_id, "g");
        assert_eq!(requests[0].name, "first");
        assert_eq!(requests[0].id, derive_id("https://a.test/1", "/data/1.bin"));
        assert_eq!(requests[1].group_id, "");
    }

    #[test]
    fn honours_leading_id_column() {
        let text = "id,url,file_path,group_id,name\n7,https://a.test/7,/data/7.bin,g,seven\n";

        let requests = parse_requests_csv(text).unwrap();

        assert_eq!(requests[0].id, 7);
        assert_eq!(requests[0].name, "seven");
    }

    #[test]
    fn rejects_non_numeric_id() {
        let text = "id,url,file_path,group_id,name\nabc,https://a.test/7,/data/7.bin,g,seven\n";
        assert!(matches!(parse_requests_csv(text), Err(FetchError::InvalidRequest { .. })));
    }
}
