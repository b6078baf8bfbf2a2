//! Compiler argument construction for syntax-only probes.
//!
//! Probes only need a pass/fail verdict, so every argument set requests a
//! syntax-only build: `-fsyntax-only` for GNU-style drivers, `/Zs` for
//! MSVC-style ones.

/// Argument syntax used by a compiler family's driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagStyle {
    Gnu,
    Msvc,
}

/// Map a family token to its driver flag style.
pub fn flag_style(family: &str) -> FlagStyle {
    match family.trim().to_lowercase().as_str() {
        "msvc" | "clang-cl" => FlagStyle::Msvc,
        _ => FlagStyle::Gnu,
    }
}

fn msvc_std_flag(std: &str) -> &'static str {
    match std.trim().to_lowercase().as_str() {
        // MSVC has no /std:c++11; c++14 is the floor.
        "c++11" | "c++14" => "/std:c++14",
        "c++17" => "/std:c++17",
        "c++20" => "/std:c++20",
        "c++23" | "c++26" => "/std:c++latest",
        _ => "/std:c++17",
    }
}

/// Standard-selection plus syntax-only flags for one family.
pub fn std_flags(family: &str, std: &str) -> String {
    match flag_style(family) {
        FlagStyle::Msvc => format!("{} /Zs", msvc_std_flag(std)),
        FlagStyle::Gnu => format!("-std={} -fsyntax-only", std.trim().to_lowercase()),
    }
}

/// Collapse runs of whitespace in user-supplied flag text.
fn normalize(flags: &str) -> String {
    flags.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Full `userArguments` string for a probe: standard flags (when a standard
/// was requested), syntax-only mode, then any user extras.
pub fn user_arguments(family: &str, std: Option<&str>, extra: Option<&str>) -> String {
    let base = match std {
        Some(s) => std_flags(family, s),
        None => match flag_style(family) {
            FlagStyle::Msvc => "/Zs".to_string(),
            FlagStyle::Gnu => "-fsyntax-only".to_string(),
        },
    };
    match extra.map(normalize).filter(|s| !s.is_empty()) {
        Some(extra) => format!("{base} {extra}"),
        None => base,
    }
}
