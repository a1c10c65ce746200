//! Minimal `multipart/form-data` reader: enough to pull one file field out of
//! an upload body that has already been read into memory.

use anyhow::Result;

use crate::error::PipelineError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilePart {
    pub filename: Option<String>,
    pub data: Vec<u8>,
}

/// The `boundary` parameter of a multipart content type, unquoted.
pub fn boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// Find the part whose `Content-Disposition` name is `field`.
pub fn extract_field(body: &[u8], boundary: &str, field: &str) -> Result<Option<FilePart>> {
    let open = format!("--{}", boundary).into_bytes();
    let separator = format!("\r\n--{}", boundary).into_bytes();

    let mut cursor = find(body, &open, 0)
        .ok_or_else(|| malformed("multipart body has no opening boundary"))?
        + open.len();
    loop {
        let rest = &body[cursor..];
        if rest.starts_with(b"--") {
            return Ok(None);
        }
        if !rest.starts_with(b"\r\n") {
            return Err(malformed("multipart boundary line is malformed"));
        }
        let part_start = cursor + 2;
        let part_end = find(body, &separator, part_start)
            .ok_or_else(|| malformed("multipart body is truncated"))?;
        let part = &body[part_start..part_end];

        let (header_bytes, data) = if part.starts_with(b"\r\n") {
            (&part[..0], &part[2..])
        } else {
            let header_end = find(part, b"\r\n\r\n", 0)
                .ok_or_else(|| malformed("multipart part has no header terminator"))?;
            (&part[..header_end], &part[header_end + 4..])
        };

        let disposition = parse_disposition(&String::from_utf8_lossy(header_bytes));
        if disposition.name.as_deref() == Some(field) {
            return Ok(Some(FilePart {
                filename: disposition.filename,
                data: data.to_vec(),
            }));
        }
        cursor = part_end + separator.len();
    }
}

#[derive(Default)]
struct Disposition {
    name: Option<String>,
    filename: Option<String>,
}

fn parse_disposition(headers: &str) -> Disposition {
    let mut out = Disposition::default();
    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("content-disposition") {
            continue;
        }
        for param in value.split(';').skip(1) {
            if let Some((k, v)) = param.split_once('=') {
                let v = v.trim().trim_matches('"').to_string();
                match k.trim() {
                    "name" => out.name = Some(v),
                    "filename" => out.filename = Some(v),
                    _ => {}
                }
            }
        }
    }
    out
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

fn malformed(message: &str) -> anyhow::Error {
    PipelineError::InvalidInput(message.to_string()).into()
}
