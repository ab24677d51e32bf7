// Tag search over response payload text.
//
// Payloads are the appliance's own XML, read as text and searched for the
// handful of elements a caller needs. No DOM is built.

use std::borrow::Cow;

/// One located element: its raw attribute text and its inner content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
    pub attributes: &'a str,
    pub inner: &'a str,
}

impl<'a> Element<'a> {
    /// Unescaped value of a double- or single-quoted attribute.
    pub fn attribute(&self, name: &str) -> Option<Cow<'a, str>> {
        let mut rest = self.attributes;
        loop {
            let at = rest.find(name)?;
            let before_ok = at == 0 || rest.as_bytes()[at - 1].is_ascii_whitespace();
            let after = rest[at + name.len()..].trim_start();
            rest = &rest[at + name.len()..];
            if !before_ok {
                continue;
            }
            let Some(after_eq) = after.strip_prefix('=') else {
                continue;
            };
            let after_eq = after_eq.trim_start();
            let quote = after_eq.chars().next()?;
            if quote != '"' && quote != '\'' {
                return None;
            }
            let value = &after_eq[1..];
            let end = value.find(quote)?;
            return Some(unescape(&value[..end]));
        }
    }

    /// Unescaped, trimmed inner text of the first child element `name`.
    pub fn child_text(&self, name: &str) -> Option<Cow<'a, str>> {
        first(self.inner, name).map(|el| unescape(el.inner.trim()))
    }
}

/// Every element named `name` in `text`, in document order.
///
/// Nested elements of the same name are each reported; an outer element's
/// inner text runs to the first matching close tag.
pub fn elements<'a>(text: &'a str, name: &str) -> Vec<Element<'a>> {
    let open = format!("<{name}");
    let close = format!("</{name}>");
    let mut found = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find(&open) {
        let start = cursor + offset;
        let after_name = start + open.len();
        cursor = after_name;

        // reject prefixes of longer names: <file vs <filestore
        match text.as_bytes().get(after_name) {
            Some(b'>' | b'/') => {}
            Some(b) if b.is_ascii_whitespace() => {}
            _ => continue,
        }
        let Some(tag_len) = text[after_name..].find('>') else {
            break;
        };
        let tag_end = after_name + tag_len;
        let self_closing = text.as_bytes()[tag_end - 1] == b'/';
        let attributes = text[after_name..if self_closing { tag_end - 1 } else { tag_end }].trim();

        if self_closing {
            found.push(Element { attributes, inner: "" });
            continue;
        }
        let body_start = tag_end + 1;
        let Some(body_len) = text[body_start..].find(&close) else {
            break;
        };
        found.push(Element {
            attributes,
            inner: &text[body_start..body_start + body_len],
        });
    }
    found
}

/// The first element named `name`.
pub fn first<'a>(text: &'a str, name: &str) -> Option<Element<'a>> {
    elements(text, name).into_iter().next()
}

/// Trimmed text of the first `name` element whose content has no markup.
///
/// Handles wrappers that reuse the leaf name, e.g.
/// `<Version xmlns:…><Version>XI52.8.0.3</Version>…</Version>`.
pub fn leaf_text<'a>(text: &'a str, name: &str) -> Option<Cow<'a, str>> {
    elements(text, name)
        .into_iter()
        .find(|el| !el.inner.contains('<'))
        .map(|el| unescape(el.inner.trim()))
}

/// Text strictly between the first `start` marker and the next `end` marker.
pub fn between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let len = text[from..].find(end)?;
    Some(&text[from..from + len])
}

/// Resolve the five predefined XML entities.
pub fn unescape(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find('&') {
        out.push_str(&rest[..at]);
        rest = &rest[at..];
        let replaced = [
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&amp;", '&'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ]
        .into_iter()
        .find(|(entity, _)| rest.starts_with(entity));
        match replaced {
            Some((entity, c)) => {
                out.push(c);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}
