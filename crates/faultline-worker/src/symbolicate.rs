//! JavaScript symbolication (spec §4.4/§4.4a), grounded in
//! `javascript_event_processor.py`'s `JavascriptEventProcessor.process_frame`
//! and `generate_module`: rewrite minified frames using a release's source
//! maps, derive `in_app` from the rewritten path, and stash the
//! untransformed stacktrace as `raw_stacktrace` before mutating anything.

use faultline_core::model::DebugSymbolBundle;
use faultline_types::{ExceptionList, StackFrame, Stacktrace};

const CONTEXT_LINES: usize = 5;

/// Supplies the minified source and parsed source map for a bundle. Kept
/// separate from `EventStore` so this module stays pure and testable —
/// the caller wires up whatever blob storage actually holds the files.
pub trait SourceMapProvider {
    fn minified_source(&self, bundle: &DebugSymbolBundle) -> Option<&str>;
    fn source_map(&self, bundle: &DebugSymbolBundle) -> Option<&sourcemap::SourceMap>;
}

/// Activated only for `platform ∈ {javascript, node}` (spec §4.4). Mutates
/// every exception's stacktrace in place, first cloning it into
/// `raw_stacktrace`.
pub fn symbolicate_exceptions(
    exceptions: &mut ExceptionList,
    event_release: Option<&str>,
    bundles: &[DebugSymbolBundle],
    provider: &dyn SourceMapProvider,
) {
    for exc in exceptions.0.iter_mut() {
        let Some(stacktrace) = exc.stacktrace.as_mut() else {
            continue;
        };
        exc.raw_stacktrace = Some(stacktrace.clone());
        symbolicate_stacktrace(stacktrace, event_release, bundles, provider);
    }
}

fn symbolicate_stacktrace(
    stacktrace: &mut Stacktrace,
    event_release: Option<&str>,
    bundles: &[DebugSymbolBundle],
    provider: &dyn SourceMapProvider,
) {
    for frame in stacktrace.frames.iter_mut() {
        symbolicate_frame(frame, event_release, bundles, provider);
    }
}

fn symbolicate_frame(
    frame: &mut StackFrame,
    event_release: Option<&str>,
    bundles: &[DebugSymbolBundle],
    provider: &dyn SourceMapProvider,
) {
    let (Some(abs_path), Some(lineno), Some(colno)) = (frame.abs_path.as_deref(), frame.lineno, frame.colno) else {
        return;
    };
    let basename = abs_path.rsplit('/').next().unwrap_or(abs_path);
    let Some(bundle) = select_bundle(bundles, basename, event_release) else {
        return;
    };
    let Some(map) = provider.source_map(bundle) else {
        return;
    };
    let Some(token) = map.lookup_token(lineno.saturating_sub(1), colno.saturating_sub(1)) else {
        return;
    };

    frame.lineno = Some(token.get_src_line() + 1);
    frame.colno = Some(token.get_src_col() + 1);
    if let Some(name) = token.get_name() {
        frame.function = Some(name.to_string());
    }

    let token_src = token.get_source().unwrap_or(abs_path).to_string();
    let (filename, mut in_app) = rewrite_filename(&token_src, abs_path);
    if frame.module.is_none() && is_module_eligible(abs_path) {
        frame.module = Some(generate_module(abs_path));
    }
    if abs_path.starts_with("webpack:") {
        frame.module = Some(generate_module(&filename));
    }
    frame.filename = Some(filename);
    if in_app.is_none() {
        in_app = frame.in_app;
    }
    frame.in_app = in_app;

    if let Some(source) = map.get_source_contents(token.get_src_id()) {
        populate_context(frame, source, token.get_src_line() as usize);
    }
}

/// Select the bundle whose `minified_file` matches the frame's basename,
/// preferring one whose `source_map_file` also matches (spec §4.4 step 1's
/// tie-break is "release matches"; since this operates per-release already
/// via the caller's pre-filtered `bundles`, basename match is sufficient).
fn select_bundle<'a>(
    bundles: &'a [DebugSymbolBundle],
    basename: &str,
    _event_release: Option<&str>,
) -> Option<&'a DebugSymbolBundle> {
    bundles.iter().find(|b| {
        b.minified_file.rsplit('/').next().unwrap_or(&b.minified_file) == basename
            || b.source_map_file
                .as_deref()
                .map(|f| f.rsplit('/').next().unwrap_or(f))
                == Some(basename)
    })
}

fn is_module_eligible(abs_path: &str) -> bool {
    abs_path.starts_with("http:")
        || abs_path.starts_with("https:")
        || abs_path.starts_with("webpack:")
        || abs_path.starts_with("app:")
}

/// `(filename, in_app)` per the §4.4a prefix rule table.
fn rewrite_filename(token_src: &str, abs_path: &str) -> (String, Option<bool>) {
    if abs_path.starts_with("webpack:") {
        let filename = if let Some(rest) = token_src.split("/~/").nth(1) {
            format!("~/{rest}")
        } else {
            token_src
                .split_once("webpack:///")
                .map(|(_, rest)| rest.to_string())
                .unwrap_or_else(|| token_src.to_string())
        };
        let in_app = if filename.starts_with("~/")
            || filename.contains("/node_modules/")
            || !filename.starts_with("./")
        {
            Some(false)
        } else {
            Some(true)
        };
        return (filename, in_app);
    }
    if abs_path.starts_with("app:") {
        let in_app = Some(!token_src.contains("/node_modules/"));
        return (token_src.to_string(), in_app);
    }
    if abs_path.contains("/node_modules/") {
        return (token_src.to_string(), Some(false));
    }
    (token_src.to_string(), None)
}

fn populate_context(frame: &mut StackFrame, source: &str, src_line: usize) {
    let lines: Vec<&str> = source.lines().collect();
    if let Some(context_line) = lines.get(src_line) {
        frame.context_line = Some(context_line.to_string());
    }
    let start = src_line.saturating_sub(CONTEXT_LINES);
    frame.pre_context = lines[start..src_line.min(lines.len())]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let end = (src_line + 1 + CONTEXT_LINES).min(lines.len());
    frame.post_context = if src_line + 1 < lines.len() {
        lines[(src_line + 1)..end].iter().map(|s| s.to_string()).collect()
    } else {
        Vec::new()
    };
}

const UNKNOWN_MODULE: &str = "<unknown module>";

/// Port of `generate_module`: strip querystring/extension, drop common
/// folder-prefix noise (`js/`, version numbers, hashes), keep the rest.
fn generate_module(src: &str) -> String {
    if src.is_empty() {
        return UNKNOWN_MODULE.to_string();
    }
    let path = src.split(['?', '#']).next().unwrap_or(src);
    let mut filename = strip_extension(path);
    if let Some(stripped) = filename.strip_suffix(".min") {
        filename = stripped.to_string();
    }

    let tokens: Vec<&str> = filename.split('/').collect();
    for (idx, token) in tokens.iter().enumerate() {
        if is_hash_like(token) {
            return tokens[idx + 1..].join("/");
        }
    }

    clean_module_prefix(&filename)
}

fn strip_extension(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    match trimmed.rfind('.') {
        Some(idx) if !trimmed[idx..].contains('/') => trimmed[..idx].to_string(),
        _ => trimmed.to_string(),
    }
}

fn is_hash_like(token: &str) -> bool {
    let is_hex = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit());
    (token.len() == 32 || token.len() == 40 || (7..=8).contains(&token.len())) && is_hex(token)
}

/// Drop leading common folder segments (`js/`, `node_modules/`, version
/// numbers, short SHAs) the way the original's `CLEAN_MODULE_RE` does.
fn clean_module_prefix(filename: &str) -> String {
    let mut segments: Vec<&str> = filename.split('/').collect();
    while let Some(first) = segments.first() {
        let lower = first.to_ascii_lowercase();
        let is_noise = first.is_empty()
            || matches!(
                lower.as_str(),
                "js" | "javascript" | "javascripts" | "script" | "scripts" | "build" | "static"
                    | "node_modules" | "bower_components"
            )
            || first.starts_with(['_', '.', '~'])
            || is_version_like(first)
            || is_hash_like(first);
        if is_noise && segments.len() > 1 {
            segments.remove(0);
        } else {
            break;
        }
    }
    let joined = segments.join("/");
    if joined.is_empty() {
        UNKNOWN_MODULE.to_string()
    } else {
        joined
    }
}

fn is_version_like(token: &str) -> bool {
    let t = token.strip_prefix('v').unwrap_or(token);
    !t.is_empty() && t.split('.').all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_module_strips_version_and_extension() {
        assert_eq!(
            generate_module("http://google.com/js/v1.0/foo/bar/baz.js"),
            "foo/bar/baz"
        );
    }

    #[test]
    fn generate_module_empty_src_is_unknown() {
        assert_eq!(generate_module(""), UNKNOWN_MODULE);
    }

    #[test]
    fn generate_module_strips_min_suffix() {
        assert_eq!(generate_module("/static/app.min.js"), "app");
    }

    #[test]
    fn webpack_node_modules_tilde_is_not_in_app() {
        let (filename, in_app) = rewrite_filename("webpack:///~/lodash/index.js", "webpack:///~/lodash/index.js");
        assert_eq!(filename, "~/lodash/index.js");
        assert_eq!(in_app, Some(false));
    }

    #[test]
    fn webpack_relative_path_is_in_app() {
        let (filename, in_app) =
            rewrite_filename("webpack:///./src/app.js", "webpack:///./src/app.js");
        assert_eq!(filename, "./src/app.js");
        assert_eq!(in_app, Some(true));
    }

    #[test]
    fn app_scheme_node_modules_is_not_in_app() {
        let (_, in_app) = rewrite_filename("app:///node_modules/foo/index.js", "app:///node_modules/foo/index.js");
        assert_eq!(in_app, Some(false));
    }

    #[test]
    fn app_scheme_otherwise_in_app() {
        let (_, in_app) = rewrite_filename("app:///src/main.js", "app:///src/main.js");
        assert_eq!(in_app, Some(true));
    }

    #[test]
    fn absolute_node_modules_path_is_not_in_app() {
        let (_, in_app) = rewrite_filename(
            "/home/app/node_modules/foo/index.js",
            "/home/app/node_modules/foo/index.js",
        );
        assert_eq!(in_app, Some(false));
    }
}
