//! Extension-based MIME detection.
//!
//! The table is consulted before any generic fallback so that extensions the
//! wider world maps to something unhelpful (e.g. `.mod` as `audio/x-mod`)
//! classify as the text they almost always are on a file server.

use std::path::Path;

/// Returns the MIME type for a path based on its extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        // markup / docs
        Some("md" | "markdown") => "text/markdown",
        Some("rst") => "text/x-rst",
        Some("adoc" | "asciidoc") => "text/x-asciidoc",
        Some("tex" | "latex") => "text/x-tex",
        Some("org") => "text/x-org",
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("xml" | "xsl" | "xslt") => "text/xml",
        Some("svg") => "image/svg+xml",
        Some("txt" | "text" | "log") => "text/plain",

        // data / config
        Some("json" | "jsonc" | "json5") => "application/json",
        Some("yaml" | "yml") => "text/yaml",
        Some("toml") => "text/x-toml",
        Some("ini" | "cfg" | "conf") => "text/x-ini",
        Some("env") => "text/plain",
        Some("csv") => "text/csv",
        Some("tsv") => "text/tab-separated-values",
        Some("sql") => "text/x-sql",
        Some("proto") => "text/x-protobuf",
        Some("ron") => "text/x-ron",
        Some("nix") => "text/x-nix",

        // languages
        Some("go") => "text/x-go",
        Some("mod" | "sum" | "lock") => "text/plain",
        Some("c" | "h") => "text/x-csrc",
        Some("cpp" | "cxx" | "cc" | "hpp" | "hxx") => "text/x-c++src",
        Some("rs") => "text/x-rust",
        Some("zig") => "text/x-zig",
        Some("java") => "text/x-java",
        Some("kt" | "kts") => "text/x-kotlin",
        Some("scala") => "text/x-scala",
        Some("cs") => "text/x-csharp",
        Some("py") => "text/x-python",
        Some("rb") => "text/x-ruby",
        Some("php") => "text/x-php",
        Some("lua") => "text/x-lua",
        Some("pl" | "pm") => "text/x-perl",
        Some("r") => "text/x-r",
        Some("jl") => "text/x-julia",
        Some("swift") => "text/x-swift",
        Some("sh" | "bash" | "zsh" | "ksh" | "fish") => "text/x-shellscript",
        Some("ps1") => "text/x-powershell",
        Some("bat" | "cmd") => "text/x-msdos-batch",
        Some("hs" | "lhs") => "text/x-haskell",
        Some("ml" | "mli") => "text/x-ocaml",
        Some("ex" | "exs") => "text/x-elixir",
        Some("erl" | "hrl") => "text/x-erlang",
        Some("clj" | "cljs" | "cljc") => "text/x-clojure",
        Some("js" | "mjs" | "cjs") => "application/javascript",
        Some("ts" | "tsx" | "jsx") => "application/typescript",
        Some("vue" | "svelte") => "text/plain",

        // images
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        Some("bmp") => "image/bmp",
        Some("ico") => "image/x-icon",
        Some("tif" | "tiff") => "image/tiff",

        // audio / video
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        Some("ogg" | "oga") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        Some("opus") => "audio/opus",
        Some("mp4" | "m4v") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",

        // archives / binaries
        Some("zip") => "application/zip",
        Some("tar") => "application/x-tar",
        Some("gz" | "tgz") => "application/gzip",
        Some("bz2") => "application/x-bzip2",
        Some("xz") => "application/x-xz",
        Some("zst") => "application/zstd",
        Some("7z") => "application/x-7z-compressed",
        Some("rar") => "application/vnd.rar",
        Some("pdf") => "application/pdf",
        Some("wasm") => "application/wasm",
        Some("iso") => "application/x-iso9660-image",
        Some("deb") => "application/vnd.debian.binary-package",
        Some("rpm") => "application/x-rpm",
        Some("apk") => "application/vnd.android.package-archive",

        // documents
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("odt") => "application/vnd.oasis.opendocument.text",
        Some("epub") => "application/epub+zip",

        // Files with no extension are usually READMEs, licenses, makefiles.
        None => match path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_ascii_lowercase())
            .as_deref()
        {
            Some("makefile" | "gnumakefile" | "dockerfile" | "justfile" | "vagrantfile") => {
                "text/plain"
            }
            Some(n) if n.starts_with("readme") || n.starts_with("license") => "text/plain",
            _ => "application/octet-stream",
        },

        Some(_) => "application/octet-stream",
    }
}

/// True for MIME types a browser can display inside an `<img>` tag.
pub fn is_image(mime: &str) -> bool {
    mime.starts_with("image/")
}

/// True for MIME types the preview page can render as (possibly highlighted)
/// text.
pub fn is_text(mime: &str) -> bool {
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/json" | "application/javascript" | "application/typescript"
        )
}

/// True for MIME types the preview page can render as a full document.
pub fn is_renderable(mime: &str) -> bool {
    matches!(mime, "text/markdown" | "text/html")
}
