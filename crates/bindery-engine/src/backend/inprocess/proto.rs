//! Prototype parsing for in-process declarations
//!
//! Natives are declared with their native prototype text, e.g.
//! `virtual int f(const std::string& s, int n = 0) const` or
//! `template<typename T> int get_size()`.

use bindery_sdk::{normalize_name, NativeError, NativeResult, Param, TemplateParams};

/// A parsed function prototype
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Prototype {
    pub name: String,
    pub return_type: String,
    pub params: Vec<Param>,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_const: bool,
    pub is_pure: bool,
    pub is_variadic: bool,
    pub template: Option<TemplateParams>,
}

fn parse_error(text: &str, why: &str) -> NativeError {
    NativeError::TypeParse(format!("{} ({})", text, why))
}

/// Find the index of the `>` closing the `<` at `open`
fn matching_angle(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '<' => depth += 1,
            '>' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on top-level occurrences of `sep`
pub(crate) fn split_top_level(text: &str, sep: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => depth -= 1,
            _ => {}
        }
        if c == sep && depth == 0 {
            out.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(c);
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

const TYPE_KEYWORDS: &[&str] = &[
    "void", "bool", "char", "short", "int", "long", "float", "double", "signed", "unsigned",
    "const", "volatile", "wchar_t",
];

/// Parse `template<typename T, class... Args>` headers
fn parse_template_header(inner: &str) -> TemplateParams {
    let mut names = Vec::new();
    let mut variadic = false;
    for part in split_top_level(inner, ',') {
        if part.contains("...") {
            variadic = true;
        }
        let name: String = part
            .chars()
            .rev()
            .take_while(|c| is_ident_char(*c))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        names.push(name);
    }
    TemplateParams { names, variadic }
}

/// Parse one parameter declaration (`const std::string& s = "x"`).
/// Returns None for `...`.
fn parse_param(text: &str) -> Option<Param> {
    let text = text.trim();
    if text == "..." {
        return None;
    }
    let (decl, has_default) = match split_top_level(text, '=').as_slice() {
        [decl, _default] => (decl.clone(), true),
        _ => (text.to_string(), false),
    };
    let mut decl = decl.trim().to_string();

    let mut extent = String::new();
    if decl.ends_with(']') {
        if let Some(open) = decl.rfind('[') {
            extent = decl[open..].to_string();
            decl = decl[..open].trim_end().to_string();
        }
    }

    let ident_len = decl.chars().rev().take_while(|c| is_ident_char(*c)).count();
    let split = decl.len() - ident_len;
    let ident = &decl[split..];
    let prefix = decl[..split].trim_end();
    let named = ident_len > 0
        && !prefix.is_empty()
        && !prefix.ends_with("::")
        && !TYPE_KEYWORDS.contains(&ident)
        && prefix != "const"
        && prefix != "unsigned"
        && prefix != "signed";

    let (ty, name) = if named {
        (format!("{}{}", prefix, extent), ident.to_string())
    } else {
        (format!("{}{}", decl, extent), String::new())
    };
    Some(Param {
        name,
        ty: ty.trim().to_string(),
        has_default,
    })
}

/// Parse a parameter list; returns the parameters and the C-variadic flag.
pub(crate) fn parse_params(text: &str) -> (Vec<Param>, bool) {
    let text = text.trim();
    if text.is_empty() || text == "void" {
        return (Vec::new(), false);
    }
    let mut params = Vec::new();
    let mut variadic = false;
    for part in split_top_level(text, ',') {
        match parse_param(&part) {
            Some(p) => params.push(p),
            None => variadic = true,
        }
    }
    (params, variadic)
}

/// Parse a full function prototype.
pub(crate) fn parse_prototype(text: &str) -> NativeResult<Prototype> {
    let mut rest = text.trim();

    let mut template = None;
    if let Some(after) = rest.strip_prefix("template") {
        let after = after.trim_start();
        let close = matching_angle(after, 0).ok_or_else(|| parse_error(text, "unclosed template"))?;
        template = Some(parse_template_header(&after[1..close]));
        rest = after[close + 1..].trim_start();
    }

    let mut is_static = false;
    let mut is_virtual = false;
    loop {
        if let Some(r) = rest.strip_prefix("static ") {
            is_static = true;
            rest = r.trim_start();
        } else if let Some(r) = rest.strip_prefix("virtual ") {
            is_virtual = true;
            rest = r.trim_start();
        } else if let Some(r) = rest.strip_prefix("inline ") {
            rest = r.trim_start();
        } else if let Some(r) = rest.strip_prefix("explicit ") {
            rest = r.trim_start();
        } else {
            break;
        }
    }

    let mut is_pure = false;
    let mut is_const = false;
    loop {
        if let Some(r) = rest.strip_suffix("= 0").or_else(|| rest.strip_suffix("=0")) {
            is_pure = true;
            is_virtual = true;
            rest = r.trim_end();
        } else if let Some(r) = rest.strip_suffix("override") {
            rest = r.trim_end();
        } else if let Some(r) = rest.strip_suffix("const") {
            is_const = true;
            rest = r.trim_end();
        } else {
            break;
        }
    }

    if !rest.ends_with(')') {
        return Err(parse_error(text, "missing parameter list"));
    }
    let mut depth = 0i32;
    let mut open = None;
    for (i, c) in rest.char_indices().rev() {
        match c {
            ')' => depth += 1,
            '(' => {
                depth -= 1;
                if depth == 0 {
                    open = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    let open = open.ok_or_else(|| parse_error(text, "unbalanced parentheses"))?;
    let (params, is_variadic) = parse_params(&rest[open + 1..rest.len() - 1]);
    let head = rest[..open].trim_end();

    let (return_type, name) = match head.find("operator") {
        Some(idx) if idx == 0 || head[..idx].ends_with(' ') || head[..idx].ends_with('&') || head[..idx].ends_with('*') => {
            let name = head[idx..].trim();
            let ret = head[..idx].trim();
            if ret.is_empty() {
                // conversion operator: `operator const char*()`
                let target = name["operator".len()..].trim();
                (normalize_name(target), format!("operator {}", normalize_name(target)))
            } else {
                let symbol: String = name["operator".len()..].split_whitespace().collect();
                (ret.to_string(), format!("operator{}", symbol))
            }
        }
        _ => {
            let ident_len = head.chars().rev().take_while(|c| is_ident_char(*c) || *c == '~').count();
            if ident_len == 0 {
                return Err(parse_error(text, "missing function name"));
            }
            let split = head.len() - ident_len;
            (head[..split].trim().to_string(), head[split..].to_string())
        }
    };

    Ok(Prototype {
        name,
        return_type: if return_type.is_empty() {
            "void".to_string()
        } else {
            return_type
        },
        params,
        is_static,
        is_virtual,
        is_const,
        is_pure,
        is_variadic,
        template,
    })
}

/// Replace template parameter names in a type string
pub(crate) fn substitute(ty: &str, names: &[String], args: &[String]) -> String {
    let mut out = String::with_capacity(ty.len());
    let mut ident = String::new();
    let flush = |ident: &mut String, out: &mut String| {
        if !ident.is_empty() {
            match names.iter().position(|n| n == ident.as_str()) {
                Some(i) if i < args.len() => out.push_str(&args[i]),
                _ => out.push_str(ident),
            }
            ident.clear();
        }
    };
    for c in ty.chars() {
        if is_ident_char(c) {
            ident.push(c);
        } else {
            flush(&mut ident, &mut out);
            out.push(c);
        }
    }
    flush(&mut ident, &mut out);
    out
}
