use chrono::DateTime;
use chrono::Utc;

/// One entry rendered into a PROPFIND `<D:response>` element: either the
/// requested resource itself (Depth 0) or one of its immediate children
/// (Depth 1), mirroring `webdav.py::_add_response_element`.
#[derive(Debug, Clone)]
pub struct DavEntry {
    pub href: String,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub mtime: DateTime<Utc>,
}

/// Builds the `multistatus` XML body for a PROPFIND response. Always
/// `207 Multi-Status` at the transport layer; this function only
/// produces the body.
pub fn build_multistatus_xml(entries: &[DavEntry]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<D:multistatus xmlns:D=\"DAV:\">");
    for entry in entries {
        xml.push_str(&render_response(entry));
    }
    xml.push_str("</D:multistatus>");
    xml
}

fn render_response(entry: &DavEntry) -> String {
    let href = escape(&entry.href);
    let displayname = escape(&entry.name);
    let last_modified = entry.mtime.format("%a, %d %b %Y %H:%M:%S GMT");
    let resourcetype = if entry.is_dir { "<D:collection/>" } else { "" };
    let content_length = if entry.is_dir {
        String::new()
    } else {
        format!("<D:getcontentlength>{}</D:getcontentlength>", entry.size)
    };
    format!(
        "<D:response><D:href>{href}</D:href><D:propstat><D:prop>\
         <D:displayname>{displayname}</D:displayname>\
         <D:resourcetype>{resourcetype}</D:resourcetype>\
         <D:getlastmodified>{last_modified}</D:getlastmodified>\
         {content_length}\
         </D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response>"
    )
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_entry_produces_one_response() {
        let xml = build_multistatus_xml(&[DavEntry {
            href: "/dav/f.txt".into(),
            name: "f.txt".into(),
            is_dir: false,
            size: 3,
            mtime: Utc::now(),
        }]);
        assert_eq!(xml.matches("<D:response>").count(), 1);
        assert!(xml.contains("<D:getcontentlength>3</D:getcontentlength>"));
    }

    #[test]
    fn directory_entries_omit_content_length_and_mark_collection() {
        let xml = build_multistatus_xml(&[DavEntry {
            href: "/dav/docs/".into(),
            name: "docs".into(),
            is_dir: true,
            size: 0,
            mtime: Utc::now(),
        }]);
        assert!(xml.contains("<D:collection/>"));
        assert!(!xml.contains("getcontentlength"));
    }

    #[test]
    fn escapes_special_characters_in_names() {
        let xml = build_multistatus_xml(&[DavEntry {
            href: "/dav/a&b.txt".into(),
            name: "a&b.txt".into(),
            is_dir: false,
            size: 1,
            mtime: Utc::now(),
        }]);
        assert!(xml.contains("a&amp;b.txt"));
    }
}
