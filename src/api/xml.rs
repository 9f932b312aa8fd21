//! S3 XML response builders and parsers

use super::sigv4::uri_encode;
use crate::multipart::{PartInfo, UploadInfo};
use crate::types::{format_iso8601, BlobSummary, ContainerInfo};
use chrono::{DateTime, Utc};
use serde::Deserialize;

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Canonical owner reported in listings.
pub const OWNER_ID: &str = "75aa57f09aa0c8caeab4f8c24e99d10f8e7faeebf76c078efc7c6caea54ba06a";
pub const OWNER_DISPLAY_NAME: &str = "CustomersName@amazon.com";

/// Escape special XML characters
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn open_root(xml: &mut String, element: &str) {
    xml.push_str(XML_HEADER);
    xml.push('\n');
    xml.push_str(&format!(r#"<{} xmlns="{}">"#, element, S3_NAMESPACE));
    xml.push('\n');
}

fn push_owner(xml: &mut String, indent: &str) {
    xml.push_str(&format!("{}<Owner>\n", indent));
    xml.push_str(&format!("{}  <ID>{}</ID>\n", indent, OWNER_ID));
    xml.push_str(&format!(
        "{}  <DisplayName>{}</DisplayName>\n",
        indent, OWNER_DISPLAY_NAME
    ));
    xml.push_str(&format!("{}</Owner>\n", indent));
}

// ============================================================================
// ListObjects / ListObjectsV2 Response
// ============================================================================

/// Version-specific paging fields of a listing.
#[derive(Debug, Clone)]
pub enum ListPaging {
    V1 {
        marker: Option<String>,
        next_marker: Option<String>,
    },
    V2 {
        continuation_token: Option<String>,
        next_continuation_token: Option<String>,
        start_after: Option<String>,
    },
}

/// ListObjects (V1 or V2) response
#[derive(Debug, Clone)]
pub struct ListBucketResult {
    pub name: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: usize,
    pub is_truncated: bool,
    pub contents: Vec<BlobSummary>,
    pub common_prefixes: Vec<String>,
    pub paging: ListPaging,
    /// `encoding-type=url` was requested
    pub url_encode: bool,
    pub fetch_owner: bool,
}

impl ListBucketResult {
    fn encode(&self, value: &str) -> String {
        if self.url_encode {
            uri_encode(value, false)
        } else {
            escape_xml(value)
        }
    }

    /// Convert to S3 XML format
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        open_root(&mut xml, "ListBucketResult");

        xml.push_str(&format!("  <Name>{}</Name>\n", escape_xml(&self.name)));
        xml.push_str(&format!("  <Prefix>{}</Prefix>\n", self.encode(&self.prefix)));
        if let Some(ref delimiter) = self.delimiter {
            xml.push_str(&format!(
                "  <Delimiter>{}</Delimiter>\n",
                self.encode(delimiter)
            ));
        }
        xml.push_str(&format!("  <MaxKeys>{}</MaxKeys>\n", self.max_keys));
        if self.url_encode {
            xml.push_str("  <EncodingType>url</EncodingType>\n");
        }
        xml.push_str(&format!(
            "  <IsTruncated>{}</IsTruncated>\n",
            self.is_truncated
        ));

        let with_owner = match self.paging {
            ListPaging::V1 {
                ref marker,
                ref next_marker,
            } => {
                xml.push_str(&format!(
                    "  <Marker>{}</Marker>\n",
                    self.encode(marker.as_deref().unwrap_or(""))
                ));
                if let Some(ref next) = next_marker {
                    xml.push_str(&format!("  <NextMarker>{}</NextMarker>\n", self.encode(next)));
                }
                true
            }
            ListPaging::V2 {
                ref continuation_token,
                ref next_continuation_token,
                ref start_after,
            } => {
                xml.push_str(&format!(
                    "  <KeyCount>{}</KeyCount>\n",
                    self.contents.len() + self.common_prefixes.len()
                ));
                if let Some(ref token) = continuation_token {
                    xml.push_str(&format!(
                        "  <ContinuationToken>{}</ContinuationToken>\n",
                        escape_xml(token)
                    ));
                }
                if let Some(ref token) = next_continuation_token {
                    xml.push_str(&format!(
                        "  <NextContinuationToken>{}</NextContinuationToken>\n",
                        escape_xml(token)
                    ));
                }
                if let Some(ref start) = start_after {
                    xml.push_str(&format!("  <StartAfter>{}</StartAfter>\n", self.encode(start)));
                }
                self.fetch_owner
            }
        };

        for obj in &self.contents {
            xml.push_str("  <Contents>\n");
            xml.push_str(&format!("    <Key>{}</Key>\n", self.encode(&obj.key)));
            xml.push_str(&format!(
                "    <LastModified>{}</LastModified>\n",
                format_iso8601(&obj.last_modified)
            ));
            xml.push_str(&format!("    <ETag>&quot;{}&quot;</ETag>\n", escape_xml(&obj.etag)));
            xml.push_str(&format!("    <Size>{}</Size>\n", obj.size));
            if with_owner {
                push_owner(&mut xml, "    ");
            }
            xml.push_str("    <StorageClass>STANDARD</StorageClass>\n");
            xml.push_str("  </Contents>\n");
        }

        for prefix in &self.common_prefixes {
            xml.push_str("  <CommonPrefixes>\n");
            xml.push_str(&format!("    <Prefix>{}</Prefix>\n", self.encode(prefix)));
            xml.push_str("  </CommonPrefixes>\n");
        }

        xml.push_str("</ListBucketResult>");
        xml
    }
}

// ============================================================================
// ListBuckets Response
// ============================================================================

/// ListBuckets response
#[derive(Debug, Clone)]
pub struct ListBucketsResult {
    pub buckets: Vec<ContainerInfo>,
}

impl ListBucketsResult {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        open_root(&mut xml, "ListAllMyBucketsResult");
        push_owner(&mut xml, "  ");

        xml.push_str("  <Buckets>\n");
        for bucket in &self.buckets {
            xml.push_str("    <Bucket>\n");
            xml.push_str(&format!(
                "      <Name>{}</Name>\n",
                escape_xml(&bucket.name)
            ));
            xml.push_str(&format!(
                "      <CreationDate>{}</CreationDate>\n",
                format_iso8601(&bucket.creation_date)
            ));
            xml.push_str("    </Bucket>\n");
        }
        xml.push_str("  </Buckets>\n");

        xml.push_str("</ListAllMyBucketsResult>");
        xml
    }
}

/// GetBucketLocation response. An empty constraint means `us-east-1`.
pub fn location_constraint() -> String {
    format!(
        "{}\n<LocationConstraint xmlns=\"{}\"></LocationConstraint>",
        XML_HEADER, S3_NAMESPACE
    )
}

// ============================================================================
// CopyObject / UploadPartCopy Response
// ============================================================================

/// CopyObject and UploadPartCopy response
#[derive(Debug, Clone)]
pub struct CopyResult {
    /// Unquoted
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

impl CopyResult {
    fn render(&self, element: &str) -> String {
        format!(
            "{}\n<{element} xmlns=\"{}\">\n  <ETag>&quot;{}&quot;</ETag>\n  <LastModified>{}</LastModified>\n</{element}>",
            XML_HEADER,
            S3_NAMESPACE,
            escape_xml(&self.etag),
            format_iso8601(&self.last_modified),
            element = element,
        )
    }

    pub fn object_xml(&self) -> String {
        self.render("CopyObjectResult")
    }

    pub fn part_xml(&self) -> String {
        self.render("CopyPartResult")
    }
}

// ============================================================================
// Multipart Responses
// ============================================================================

pub fn initiate_multipart_result(bucket: &str, key: &str, upload_id: &str) -> String {
    let mut xml = String::new();
    open_root(&mut xml, "InitiateMultipartUploadResult");
    xml.push_str(&format!("  <Bucket>{}</Bucket>\n", escape_xml(bucket)));
    xml.push_str(&format!("  <Key>{}</Key>\n", escape_xml(key)));
    xml.push_str(&format!("  <UploadId>{}</UploadId>\n", escape_xml(upload_id)));
    xml.push_str("</InitiateMultipartUploadResult>");
    xml
}

pub fn complete_multipart_result(location: &str, bucket: &str, key: &str, etag: &str) -> String {
    let mut xml = String::new();
    open_root(&mut xml, "CompleteMultipartUploadResult");
    xml.push_str(&format!("  <Location>{}</Location>\n", escape_xml(location)));
    xml.push_str(&format!("  <Bucket>{}</Bucket>\n", escape_xml(bucket)));
    xml.push_str(&format!("  <Key>{}</Key>\n", escape_xml(key)));
    xml.push_str(&format!("  <ETag>&quot;{}&quot;</ETag>\n", escape_xml(etag)));
    xml.push_str("</CompleteMultipartUploadResult>");
    xml
}

/// ListParts response
#[derive(Debug, Clone)]
pub struct ListPartsResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number_marker: u32,
    pub next_part_number_marker: Option<u32>,
    pub max_parts: usize,
    pub is_truncated: bool,
    pub parts: Vec<PartInfo>,
}

impl ListPartsResult {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        open_root(&mut xml, "ListPartsResult");
        xml.push_str(&format!("  <Bucket>{}</Bucket>\n", escape_xml(&self.bucket)));
        xml.push_str(&format!("  <Key>{}</Key>\n", escape_xml(&self.key)));
        xml.push_str(&format!(
            "  <UploadId>{}</UploadId>\n",
            escape_xml(&self.upload_id)
        ));
        push_owner(&mut xml, "  ");
        xml.push_str("  <StorageClass>STANDARD</StorageClass>\n");
        xml.push_str(&format!(
            "  <PartNumberMarker>{}</PartNumberMarker>\n",
            self.part_number_marker
        ));
        if let Some(next) = self.next_part_number_marker {
            xml.push_str(&format!(
                "  <NextPartNumberMarker>{}</NextPartNumberMarker>\n",
                next
            ));
        }
        xml.push_str(&format!("  <MaxParts>{}</MaxParts>\n", self.max_parts));
        xml.push_str(&format!(
            "  <IsTruncated>{}</IsTruncated>\n",
            self.is_truncated
        ));
        for part in &self.parts {
            xml.push_str("  <Part>\n");
            xml.push_str(&format!("    <PartNumber>{}</PartNumber>\n", part.part_number));
            xml.push_str(&format!(
                "    <LastModified>{}</LastModified>\n",
                format_iso8601(&part.last_modified)
            ));
            xml.push_str(&format!("    <ETag>&quot;{}&quot;</ETag>\n", escape_xml(&part.etag)));
            xml.push_str(&format!("    <Size>{}</Size>\n", part.size));
            xml.push_str("  </Part>\n");
        }
        xml.push_str("</ListPartsResult>");
        xml
    }
}

/// ListMultipartUploads response
#[derive(Debug, Clone)]
pub struct ListMultipartUploadsResult {
    pub bucket: String,
    pub prefix: String,
    pub key_marker: String,
    pub upload_id_marker: String,
    pub max_uploads: usize,
    pub is_truncated: bool,
    pub uploads: Vec<UploadInfo>,
}

impl ListMultipartUploadsResult {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        open_root(&mut xml, "ListMultipartUploadsResult");
        xml.push_str(&format!("  <Bucket>{}</Bucket>\n", escape_xml(&self.bucket)));
        xml.push_str(&format!(
            "  <KeyMarker>{}</KeyMarker>\n",
            escape_xml(&self.key_marker)
        ));
        xml.push_str(&format!(
            "  <UploadIdMarker>{}</UploadIdMarker>\n",
            escape_xml(&self.upload_id_marker)
        ));
        if let Some(last) = self.uploads.last().filter(|_| self.is_truncated) {
            xml.push_str(&format!(
                "  <NextKeyMarker>{}</NextKeyMarker>\n",
                escape_xml(&last.key)
            ));
            xml.push_str(&format!(
                "  <NextUploadIdMarker>{}</NextUploadIdMarker>\n",
                escape_xml(&last.upload_id)
            ));
        }
        xml.push_str(&format!("  <Prefix>{}</Prefix>\n", escape_xml(&self.prefix)));
        xml.push_str(&format!("  <MaxUploads>{}</MaxUploads>\n", self.max_uploads));
        xml.push_str(&format!(
            "  <IsTruncated>{}</IsTruncated>\n",
            self.is_truncated
        ));
        for upload in &self.uploads {
            xml.push_str("  <Upload>\n");
            xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&upload.key)));
            xml.push_str(&format!(
                "    <UploadId>{}</UploadId>\n",
                escape_xml(&upload.upload_id)
            ));
            push_owner(&mut xml, "    ");
            xml.push_str("    <StorageClass>STANDARD</StorageClass>\n");
            xml.push_str(&format!(
                "    <Initiated>{}</Initiated>\n",
                format_iso8601(&upload.initiated)
            ));
            xml.push_str("  </Upload>\n");
        }
        xml.push_str("</ListMultipartUploadsResult>");
        xml
    }
}

// ============================================================================
// CompleteMultipartUpload Request
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// CompleteMultipartUpload request body
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteMultipartUpload {
    #[serde(rename = "Part", default)]
    pub parts: Vec<CompletedPart>,
}

impl CompleteMultipartUpload {
    pub fn from_xml(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }
}

// ============================================================================
// DeleteObjects Request/Response
// ============================================================================

/// Delete request object
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteObjectIdentifier {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "VersionId")]
    pub version_id: Option<String>,
}

/// Delete request body
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRequest {
    #[serde(rename = "Quiet")]
    pub quiet: Option<bool>,
    #[serde(rename = "Object", default)]
    pub objects: Vec<DeleteObjectIdentifier>,
}

impl DeleteRequest {
    /// Parse from XML body
    pub fn from_xml(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }
}

/// Error deleting a single object
#[derive(Debug, Clone)]
pub struct DeleteError {
    pub key: String,
    pub code: &'static str,
    pub message: String,
}

/// DeleteObjects response
#[derive(Debug, Clone, Default)]
pub struct DeleteResult {
    pub deleted: Vec<String>,
    pub errors: Vec<DeleteError>,
}

impl DeleteResult {
    pub fn to_xml(&self, quiet: bool) -> String {
        let mut xml = String::new();
        open_root(&mut xml, "DeleteResult");

        // Quiet mode reports failures only
        if !quiet {
            for key in &self.deleted {
                xml.push_str("  <Deleted>\n");
                xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(key)));
                xml.push_str("  </Deleted>\n");
            }
        }

        for error in &self.errors {
            xml.push_str("  <Error>\n");
            xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&error.key)));
            xml.push_str(&format!("    <Code>{}</Code>\n", error.code));
            xml.push_str(&format!(
                "    <Message>{}</Message>\n",
                escape_xml(&error.message)
            ));
            xml.push_str("  </Error>\n");
        }

        xml.push_str("</DeleteResult>");
        xml
    }
}
