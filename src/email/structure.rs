//! MIME body-structure tree and the walks over it.

use super::format::decode_header_text;
use super::model::AttachmentInfo;

/// One node of a message's MIME structure. Each node owns its children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BodyNode {
    /// Lowercase `type/subtype`.
    pub content_type: String,
    /// IMAP section identifier (`1`, `2.1`, ...). The root never carries one.
    pub part: Option<String>,
    pub size: Option<u32>,
    /// Content-Transfer-Encoding, lowercase.
    pub encoding: Option<String>,
    /// Disposition type, lowercase.
    pub disposition: Option<String>,
    pub disposition_params: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub children: Vec<BodyNode>,
}

impl BodyNode {
    pub fn is_multipart(&self) -> bool {
        self.content_type.starts_with("multipart/")
    }

    pub fn is_message(&self) -> bool {
        self.content_type == "message/rfc822"
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        lookup(&self.params, name)
    }

    pub fn charset(&self) -> Option<&str> {
        self.param("charset")
    }

    /// Disposition `filename`, falling back to the content-type `name`.
    pub fn filename(&self) -> Option<String> {
        lookup(&self.disposition_params, "filename")
            .or_else(|| {
                lookup(&self.disposition_params, "filename*").map(strip_rfc2231_prefix)
            })
            .or_else(|| self.param("name"))
            .map(|raw| decode_header_text(raw.as_bytes()))
            .filter(|name| !name.is_empty())
    }

    fn attachment_info(&self) -> Option<AttachmentInfo> {
        let filename = self.filename();
        let qualifies = match self.disposition.as_deref() {
            Some("attachment") => true,
            Some("inline") => filename.is_some(),
            _ => false,
        };
        qualifies.then(|| AttachmentInfo {
            filename,
            size: self.size,
            content_type: self.content_type.clone(),
        })
    }
}

fn lookup<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

// `utf-8''report.pdf` -> `report.pdf`
fn strip_rfc2231_prefix(value: &str) -> &str {
    value.splitn(3, '\'').nth(2).unwrap_or(value)
}

/// Assign IMAP section identifiers to every node below the root.
///
/// Children of the root are `1`, `2`, ...; children of part `p` are `p.1`,
/// `p.2`, .... The body embedded in a `message/rfc822` part `p` is `p.1` when
/// single-part, otherwise its children are numbered directly under `p`.
pub fn number_parts(root: &mut BodyNode) {
    root.part = None;
    number_children(&mut root.children, None);
}

fn number_children(children: &mut [BodyNode], prefix: Option<&str>) {
    for (i, child) in children.iter_mut().enumerate() {
        let id = match prefix {
            Some(p) => format!("{}.{}", p, i + 1),
            None => (i + 1).to_string(),
        };
        assign_part(child, id);
    }
}

fn assign_part(node: &mut BodyNode, id: String) {
    if node.is_message() {
        if let Some(inner) = node.children.first_mut() {
            if inner.is_multipart() {
                inner.part = None;
                number_children(&mut inner.children, Some(&id));
            } else {
                assign_part(inner, format!("{}.1", id));
            }
        }
    } else {
        number_children(&mut node.children, Some(&id));
    }
    node.part = Some(id);
}

/// First node in document order with the given content type and a part identifier.
pub fn find_first_part_of_type<'a>(
    node: &'a BodyNode,
    content_type: &str,
) -> Option<&'a BodyNode> {
    if node.part.is_some() && node.content_type.eq_ignore_ascii_case(content_type) {
        return Some(node);
    }
    node.children
        .iter()
        .find_map(|child| find_first_part_of_type(child, content_type))
}

/// Attachment-like parts in document order; each node is visited before its children.
pub fn collect_attachments(root: &BodyNode) -> Vec<AttachmentInfo> {
    let mut found = Vec::new();
    visit_attachments(root, &mut found);
    found
}

fn visit_attachments(node: &BodyNode, found: &mut Vec<AttachmentInfo>) {
    if let Some(info) = node.attachment_info() {
        found.push(info);
    }
    for child in &node.children {
        visit_attachments(child, found);
    }
}

/// Undo the transfer encoding and convert the charset of downloaded part content.
pub fn decode_part(raw: &[u8], encoding: Option<&str>, charset: Option<&str>) -> String {
    let mut synthetic = format!(
        "Content-Type: text/plain; charset=\"{}\"\r\nContent-Transfer-Encoding: {}\r\n\r\n",
        charset.unwrap_or("utf-8"),
        encoding.unwrap_or("7bit"),
    )
    .into_bytes();
    synthetic.extend_from_slice(raw);

    match mailparse::parse_mail(&synthetic).and_then(|parsed| parsed.get_body()) {
        Ok(text) => text,
        Err(err) => {
            tracing::debug!("Falling back to lossy UTF-8 for part content: {}", err);
            String::from_utf8_lossy(raw).into_owned()
        }
    }
}
