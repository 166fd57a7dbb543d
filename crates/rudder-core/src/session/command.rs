//! Slash-command routing for outgoing submissions.

use std::collections::BTreeMap;

use crate::config::CommandTemplate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Plain prompt text, possibly produced by a local template.
    Prompt(String),
    Summarize,
    Init,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlashCommand<'a> {
    pub name: &'a str,
    pub arguments: &'a str,
}

/// Splits `/name rest` into its parts. Anything else is not a command.
pub fn parse_slash(text: &str) -> Option<SlashCommand<'_>> {
    let rest = text.trim_start().strip_prefix('/')?;
    let (name, arguments) = match rest.split_once(char::is_whitespace) {
        Some((name, arguments)) => (name, arguments.trim()),
        None => (rest.trim_end(), ""),
    };
    if name.is_empty() || name.contains('/') {
        return None;
    }
    Some(SlashCommand { name, arguments })
}

pub fn route(text: &str, templates: &BTreeMap<String, CommandTemplate>) -> Dispatch {
    let Some(command) = parse_slash(text) else {
        return Dispatch::Prompt(text.to_string());
    };

    match command.name {
        "summarize" | "compact" => Dispatch::Summarize,
        "init" => Dispatch::Init,
        name => {
            let expanded = templates
                .get(name)
                .and_then(|t| expand_template(&t.template, command.arguments));
            match expanded {
                Some(expanded) => Dispatch::Prompt(expanded),
                None => {
                    tracing::debug!(
                        target: "session.command",
                        command = name,
                        "No usable template, sending raw text"
                    );
                    Dispatch::Prompt(text.to_string())
                }
            }
        }
    }
}

/// Substitutes `$ARGUMENTS` and `$1`..`$9`. Returns `None` when the template asks
/// for a positional argument that was not supplied.
pub fn expand_template(template: &str, arguments: &str) -> Option<String> {
    let positional: Vec<&str> = arguments.split_whitespace().collect();
    let mut out = String::with_capacity(template.len() + arguments.len());
    let mut rest = template;

    while let Some(index) = rest.find('$') {
        out.push_str(&rest[..index]);
        let after = &rest[index + 1..];

        if let Some(tail) = after.strip_prefix("ARGUMENTS") {
            out.push_str(arguments);
            rest = tail;
        } else if let Some(digit) = after.chars().next().and_then(|c| c.to_digit(10))
            && digit > 0
        {
            out.push_str(positional.get(digit as usize - 1)?);
            rest = &after[1..];
        } else {
            out.push('$');
            rest = after;
        }
    }
    out.push_str(rest);
    Some(out)
}
