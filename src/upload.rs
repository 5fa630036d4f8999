use crate::error::ConvertError;
use axum::extract::Multipart;

/// A parsed `/convert` form.
#[derive(Debug)]
pub struct ConversionRequest {
    /// Filename from the `file` part; `None` when the client sent none.
    pub filename: Option<String>,
    pub data: Vec<u8>,
    pub library: String,
}

/// Read the `file` and `library` fields from a multipart upload.
pub async fn parse_multipart(mut multipart: Multipart) -> Result<ConversionRequest, ConvertError> {
    let mut file: Option<(Option<String>, Vec<u8>)> = None;
    let mut library: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .map(|n| n.to_string());
                let data = field.bytes().await?.to_vec();
                file = Some((filename, data));
            }
            "library" => {
                library = Some(field.text().await?);
            }
            // next_field skips whatever an unknown field leaves unread
            _ => {}
        }
    }

    let (filename, data) = file.ok_or(ConvertError::MissingField("file"))?;
    let library = library.ok_or(ConvertError::MissingField("library"))?;

    Ok(ConversionRequest {
        filename,
        data,
        library,
    })
}
