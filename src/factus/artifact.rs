//! PDF/XML invoice artifact download and validation.
//!
//! The provider's download endpoints answer either with the raw document
//! (content-type already the target MIME type) or with a JSON envelope
//! carrying the document base64-encoded. Which one happens depends on the
//! deployment; callers only ever see a validated [`Artifact`].

use super::{check_status, FactusClient};
use crate::error::{InvoicingError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

const PDF_SIGNATURE: &[u8] = b"%PDF-";
const XML_MARKER: &str = "<?xml";

/// Downloadable artifact format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Pdf,
    Xml,
}

impl ArtifactKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "application/pdf",
            ArtifactKind::Xml => "application/xml",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "pdf",
            ArtifactKind::Xml => "xml",
        }
    }

    /// Envelope field holding the base64 document.
    fn envelope_field(&self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "pdf_base_64_encoded",
            ArtifactKind::Xml => "xml_base_64_encoded",
        }
    }

    /// True when `content_type` already names this format.
    fn matches_content_type(&self, content_type: &str) -> bool {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match self {
            ArtifactKind::Pdf => media_type == "application/pdf",
            ArtifactKind::Xml => media_type == "application/xml" || media_type == "text/xml",
        }
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(ArtifactKind::Pdf),
            "xml" => Ok(ArtifactKind::Xml),
            other => Err(format!("unknown artifact kind '{}'", other)),
        }
    }
}

/// A validated invoice document. Only built after its signature checks out.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    kind: ArtifactKind,
    bytes: Vec<u8>,
    file_name: String,
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn mime_type(&self) -> &'static str {
        self.kind.mime_type()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

/// Shape of a download response, decided once from its content-type.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadPayload {
    /// Response body is the document itself.
    Binary(Vec<u8>),
    /// Response body is JSON carrying a base64 document.
    Envelope(Value),
}

impl DownloadPayload {
    fn classify(kind: ArtifactKind, content_type: Option<&str>, body: Vec<u8>) -> Result<Self> {
        if content_type.is_some_and(|ct| kind.matches_content_type(ct)) {
            return Ok(DownloadPayload::Binary(body));
        }
        serde_json::from_slice(&body)
            .map(DownloadPayload::Envelope)
            .map_err(|_| {
                InvoicingError::ArtifactMissing(format!(
                    "response is neither {} nor a JSON envelope",
                    kind.mime_type()
                ))
            })
    }
}

/// Turn a download payload into a validated artifact.
///
/// `number` names the fallback file when the envelope carries no file name.
pub fn decode_artifact(kind: ArtifactKind, payload: DownloadPayload, number: &str) -> Result<Artifact> {
    let default_name = format!("{}.{}", number, kind.extension());

    let (bytes, file_name) = match payload {
        DownloadPayload::Binary(bytes) => (bytes, default_name),
        DownloadPayload::Envelope(envelope) => {
            let data = envelope.get("data").filter(|d| d.is_object()).unwrap_or(&envelope);
            let encoded = data
                .get(kind.envelope_field())
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| {
                    InvoicingError::ArtifactMissing(format!(
                        "envelope has no {} field",
                        kind.envelope_field()
                    ))
                })?;
            let file_name = data
                .get("file_name")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(|s| with_extension(s, kind))
                .unwrap_or(default_name);
            (decode_base64(encoded)?, file_name)
        }
    };

    validate_signature(kind, &bytes)?;
    Ok(Artifact {
        kind,
        bytes,
        file_name,
    })
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    BASE64
        .decode(compact.as_bytes())
        .map_err(|e| InvoicingError::InvalidArtifact(format!("payload is not valid base64: {}", e)))
}

fn validate_signature(kind: ArtifactKind, bytes: &[u8]) -> Result<()> {
    let valid = match kind {
        ArtifactKind::Pdf => bytes.starts_with(PDF_SIGNATURE),
        ArtifactKind::Xml => String::from_utf8_lossy(bytes).contains(XML_MARKER),
    };
    if valid {
        Ok(())
    } else {
        Err(InvoicingError::InvalidArtifact(format!(
            "document does not carry a {} signature",
            kind.extension().to_uppercase()
        )))
    }
}

fn with_extension(name: &str, kind: ArtifactKind) -> String {
    let suffix = format!(".{}", kind.extension());
    if name.to_ascii_lowercase().ends_with(&suffix) {
        name.to_string()
    } else {
        format!("{}{}", name, suffix)
    }
}

/// Downloads invoice artifacts.
#[derive(Clone)]
pub struct ArtifactRetriever {
    client: Arc<FactusClient>,
}

impl ArtifactRetriever {
    pub fn new(client: Arc<FactusClient>) -> Self {
        Self { client }
    }

    /// Download and validate the `kind` artifact for invoice `number`.
    ///
    /// # Errors
    /// - `NotFound` when the provider has no such invoice
    /// - `ArtifactMissing` when the envelope carries no document
    /// - `InvalidArtifact` when the bytes fail the signature check
    pub async fn download_artifact(&self, number: &str, kind: ArtifactKind) -> Result<Artifact> {
        let url = self.client.url(&format!(
            "/v1/bills/download-{}/{}",
            kind.extension(),
            urlencoding::encode(number)
        ));
        let accept = format!("{}, application/json", kind.mime_type());

        let response = self
            .client
            .send_authorized(
                |http, token| http.get(&url).bearer_auth(token).header("Accept", accept.as_str()),
                true,
            )
            .await?;
        let response = check_status(response, &format!("invoice {}", number)).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(InvoicingError::transport)?
            .to_vec();

        let payload = DownloadPayload::classify(kind, content_type.as_deref(), body)?;
        debug!(
            number = %number,
            kind = kind.extension(),
            binary = matches!(payload, DownloadPayload::Binary(_)),
            "Artifact downloaded"
        );

        decode_artifact(kind, payload, number).inspect_err(|e| {
            warn!(number = %number, kind = kind.extension(), error = %e, "Artifact rejected");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factus::test_support::{client_for, TOKEN_BODY};
    use mockito::{Server, ServerGuard};
    use serde_json::json;

    const PDF_BYTES: &[u8] = b"%PDF-1.7\n1 0 obj\n<<>>\nendobj\n%%EOF";
    const XML_TEXT: &str = r#"<?xml version="1.0"?><Invoice><ID>SETP1</ID></Invoice>"#;

    fn envelope(field: &str, bytes: &[u8]) -> DownloadPayload {
        DownloadPayload::Envelope(json!({"data": {"file_name": "fv0901", field: BASE64.encode(bytes)}}))
    }

    #[test]
    fn test_pdf_envelope_decodes() {
        let artifact = decode_artifact(
            ArtifactKind::Pdf,
            envelope("pdf_base_64_encoded", PDF_BYTES),
            "SETP1",
        )
        .unwrap();
        assert_eq!(artifact.mime_type(), "application/pdf");
        assert_eq!(artifact.bytes(), PDF_BYTES);
        assert_eq!(artifact.file_name(), "fv0901.pdf");
    }

    #[test]
    fn test_pdf_envelope_wrong_signature() {
        let err = decode_artifact(
            ArtifactKind::Pdf,
            envelope("pdf_base_64_encoded", b"<html>error</html>"),
            "SETP1",
        )
        .unwrap_err();
        assert!(matches!(err, InvoicingError::InvalidArtifact(_)));
    }

    #[test]
    fn test_xml_envelope_decodes() {
        let artifact = decode_artifact(
            ArtifactKind::Xml,
            envelope("xml_base_64_encoded", XML_TEXT.as_bytes()),
            "SETP1",
        )
        .unwrap();
        assert_eq!(artifact.mime_type(), "application/xml");
        assert_eq!(artifact.bytes(), XML_TEXT.as_bytes());
    }

    #[test]
    fn test_xml_envelope_rejects_json_text() {
        let err = decode_artifact(
            ArtifactKind::Xml,
            envelope("xml_base_64_encoded", br#"{"not":"xml"}"#),
            "SETP1",
        )
        .unwrap_err();
        assert!(matches!(err, InvoicingError::InvalidArtifact(_)));
    }

    #[test]
    fn test_envelope_missing_field() {
        let payload = DownloadPayload::Envelope(json!({"data": {"file_name": "fv0901"}}));
        let err = decode_artifact(ArtifactKind::Pdf, payload, "SETP1").unwrap_err();
        assert!(matches!(err, InvoicingError::ArtifactMissing(_)));

        // The other format's field does not count
        let err = decode_artifact(
            ArtifactKind::Xml,
            envelope("pdf_base_64_encoded", PDF_BYTES),
            "SETP1",
        )
        .unwrap_err();
        assert!(matches!(err, InvoicingError::ArtifactMissing(_)));
    }

    #[test]
    fn test_envelope_field_at_top_level() {
        let payload = DownloadPayload::Envelope(json!({"pdf_base_64_encoded": BASE64.encode(PDF_BYTES)}));
        let artifact = decode_artifact(ArtifactKind::Pdf, payload, "SETP7").unwrap();
        assert_eq!(artifact.file_name(), "SETP7.pdf");
    }

    #[test]
    fn test_base64_with_line_breaks() {
        let encoded = BASE64.encode(PDF_BYTES);
        let wrapped = format!("{}\n{}", &encoded[..10], &encoded[10..]);
        let payload = DownloadPayload::Envelope(json!({"data": {"pdf_base_64_encoded": wrapped}}));
        assert!(decode_artifact(ArtifactKind::Pdf, payload, "SETP1").is_ok());
    }

    #[test]
    fn test_invalid_base64() {
        let payload = DownloadPayload::Envelope(json!({"data": {"pdf_base_64_encoded": "***not base64***"}}));
        let err = decode_artifact(ArtifactKind::Pdf, payload, "SETP1").unwrap_err();
        assert!(matches!(err, InvoicingError::InvalidArtifact(_)));
    }

    #[test]
    fn test_binary_payload_still_validated() {
        let ok = decode_artifact(ArtifactKind::Pdf, DownloadPayload::Binary(PDF_BYTES.to_vec()), "SETP1").unwrap();
        assert_eq!(ok.file_name(), "SETP1.pdf");

        let err = decode_artifact(ArtifactKind::Pdf, DownloadPayload::Binary(b"garbage".to_vec()), "SETP1")
            .unwrap_err();
        assert!(matches!(err, InvoicingError::InvalidArtifact(_)));
    }

    #[test]
    fn test_classify_by_content_type() {
        let payload = DownloadPayload::classify(
            ArtifactKind::Pdf,
            Some("application/pdf; charset=binary"),
            PDF_BYTES.to_vec(),
        )
        .unwrap();
        assert!(matches!(payload, DownloadPayload::Binary(_)));

        let payload =
            DownloadPayload::classify(ArtifactKind::Xml, Some("text/xml"), XML_TEXT.as_bytes().to_vec()).unwrap();
        assert!(matches!(payload, DownloadPayload::Binary(_)));

        let payload =
            DownloadPayload::classify(ArtifactKind::Pdf, Some("application/json"), br#"{"data":{}}"#.to_vec())
                .unwrap();
        assert!(matches!(payload, DownloadPayload::Envelope(_)));

        let err = DownloadPayload::classify(ArtifactKind::Pdf, Some("text/html"), b"<html>".to_vec()).unwrap_err();
        assert!(matches!(err, InvoicingError::ArtifactMissing(_)));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("pdf".parse::<ArtifactKind>(), Ok(ArtifactKind::Pdf));
        assert_eq!("XML".parse::<ArtifactKind>(), Ok(ArtifactKind::Xml));
        assert!("zip".parse::<ArtifactKind>().is_err());
    }

    async fn server_with_token() -> ServerGuard {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(TOKEN_BODY)
            .create_async()
            .await;
        server
    }

    #[tokio::test]
    async fn test_download_binary_pdf() {
        let mut server = server_with_token().await;
        let _pdf = server
            .mock("GET", "/v1/bills/download-pdf/SETP990000002")
            .match_header("authorization", "Bearer tok-1")
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .with_body(PDF_BYTES)
            .create_async()
            .await;

        let retriever = ArtifactRetriever::new(Arc::new(client_for(&server.url())));
        let artifact = retriever
            .download_artifact("SETP990000002", ArtifactKind::Pdf)
            .await
            .unwrap();
        assert_eq!(artifact.bytes(), PDF_BYTES);
        assert_eq!(artifact.file_name(), "SETP990000002.pdf");
    }

    #[tokio::test]
    async fn test_download_xml_envelope() {
        let mut server = server_with_token().await;
        let body = json!({
            "status": "OK",
            "data": {"file_name": "ad09001", "xml_base_64_encoded": BASE64.encode(XML_TEXT)}
        });
        let _xml = server
            .mock("GET", "/v1/bills/download-xml/SETP990000002")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let retriever = ArtifactRetriever::new(Arc::new(client_for(&server.url())));
        let artifact = retriever
            .download_artifact("SETP990000002", ArtifactKind::Xml)
            .await
            .unwrap();
        assert_eq!(artifact.mime_type(), "application/xml");
        assert_eq!(artifact.file_name(), "ad09001.xml");
    }

    #[tokio::test]
    async fn test_download_corrupt_pdf_rejected() {
        let mut server = server_with_token().await;
        let body = json!({"data": {"pdf_base_64_encoded": BASE64.encode(b"not a pdf")}});
        let _pdf = server
            .mock("GET", "/v1/bills/download-pdf/SETP1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let retriever = ArtifactRetriever::new(Arc::new(client_for(&server.url())));
        let err = retriever.download_artifact("SETP1", ArtifactKind::Pdf).await.unwrap_err();
        assert!(matches!(err, InvoicingError::InvalidArtifact(_)));
    }

    #[tokio::test]
    async fn test_download_unknown_invoice() {
        let mut server = server_with_token().await;
        let _pdf = server
            .mock("GET", "/v1/bills/download-pdf/NOPE")
            .with_status(404)
            .create_async()
            .await;

        let retriever = ArtifactRetriever::new(Arc::new(client_for(&server.url())));
        let err = retriever.download_artifact("NOPE", ArtifactKind::Pdf).await.unwrap_err();
        assert!(matches!(err, InvoicingError::NotFound(_)));
    }
}
