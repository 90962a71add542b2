use super::registry::Registry;
use crate::api::drive::{AboutInfo, FileInfo};
use crate::error::ProxyError;
use crate::logging::LogSnapshot;
use chrono::SecondsFormat;
use std::error::Error as _;
use std::fmt::Write as _;

pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn attr(out: &mut String, name: &str, value: impl AsRef<str>) {
    let _ = write!(out, " {name}=\"{}\"", escape(value.as_ref()));
}

fn optional_attr(out: &mut String, name: &str, value: Option<impl AsRef<str>>) {
    if let Some(value) = value {
        attr(out, name, value);
    }
}

pub fn file(file: &FileInfo) -> String {
    let mut out = String::from("<File");
    attr(&mut out, "Id", &file.id);
    attr(&mut out, "Title", &file.title);
    attr(&mut out, "MimeType", &file.mime_type);
    attr(&mut out, "IsFolder", file.is_folder.to_string());
    attr(&mut out, "IsRoot", file.is_root.to_string());
    optional_attr(&mut out, "ParentId", file.parent_id.as_deref());
    optional_attr(
        &mut out,
        "FilePath",
        file.file_path.as_ref().map(|path| path.display().to_string()),
    );
    optional_attr(
        &mut out,
        "ModifiedDate",
        file.modified_date
            .map(|date| date.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    attr(&mut out, "FileSize", file.file_size.to_string());
    attr(&mut out, "Trashed", file.trashed.to_string());
    optional_attr(&mut out, "AlternateLink", file.alternate_link.as_deref());
    optional_attr(&mut out, "Md5Checksum", file.md5_checksum.as_deref());
    out.push_str("/>");
    out
}

pub fn files(files: &[FileInfo]) -> String {
    let mut out = format!("<Files Count=\"{}\">\n", files.len());
    for entry in files {
        let _ = writeln!(out, "  {}", file(entry));
    }
    out.push_str("</Files>");
    out
}

pub fn about(about: &AboutInfo) -> String {
    let mut out = String::from("<About");
    attr(&mut out, "Name", &about.name);
    optional_attr(&mut out, "User", about.user.as_deref());
    optional_attr(&mut out, "QuotaTotal", about.quota_total.map(|v| v.to_string()));
    optional_attr(&mut out, "QuotaUsed", about.quota_used.map(|v| v.to_string()));
    attr(&mut out, "RootFolderId", &about.root_folder_id);
    out.push_str("/>");
    out
}

pub fn log(snapshot: &LogSnapshot) -> String {
    let mut out = String::from("<Log");
    attr(&mut out, "Level", &snapshot.level);
    attr(&mut out, "Format", snapshot.format.to_string());
    attr(
        &mut out,
        "Directory",
        snapshot
            .directory
            .as_ref()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default(),
    );
    attr(
        &mut out,
        "FileName",
        snapshot.file_name.clone().unwrap_or_default(),
    );
    out.push_str("/>");
    out
}

/// `<Error>` 块：错误链上每一层一个 `<Detail>`，需要时附带方法目录
pub fn error(err: &ProxyError, catalog: Option<&Registry>) -> String {
    let mut out = String::from("<Error");
    attr(&mut out, "Type", err.kind());
    attr(&mut out, "Message", err.to_string());
    out.push_str(">\n");

    let mut source = err.source();
    while let Some(cause) = source {
        let _ = writeln!(out, "  <Detail>{}</Detail>", escape(&cause.to_string()));
        source = cause.source();
    }

    if let Some(registry) = catalog {
        out.push_str("  <Methods>\n");
        for handler in registry.handlers() {
            let id = handler.id();
            let _ = writeln!(
                out,
                "    <Method Id=\"{}\" Name=\"{}\">",
                id.value(),
                escape(id.as_str())
            );
            for parameter in handler.parameters() {
                let _ = writeln!(
                    out,
                    "      <Parameter Name=\"{}\" Type=\"{}\" Required=\"{}\"/>",
                    escape(parameter.name),
                    parameter.kind.as_str(),
                    parameter.required
                );
            }
            out.push_str("    </Method>\n");
        }
        out.push_str("  </Methods>\n");
    }
    out.push_str("</Error>");
    out
}
