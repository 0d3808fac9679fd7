use crate::model::Service;

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    pub fn is_noop(&self) -> bool {
        self.name.is_empty()
    }
}

pub fn parse(line: &str) -> Command {
    let mut parts = line.split_whitespace().map(str::to_string);
    let Some(name) = parts.next() else {
        return Command::default();
    };
    Command {
        name,
        args: parts.collect(),
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Verb {
    Quit,
    QuitAll,
    Refresh,
    Help,
    ClearFilter,
    SelectAll,
    DeselectAll,
    Service(Service),
    Account,
    Region,
}

/// Every spelling accepted on the command line, in completion order.
pub const VERBS: [(&str, Verb); 19] = [
    ("q", Verb::Quit),
    ("quit", Verb::Quit),
    ("qa", Verb::QuitAll),
    ("r", Verb::Refresh),
    ("refresh", Verb::Refresh),
    ("help", Verb::Help),
    ("h", Verb::Help),
    ("cf", Verb::ClearFilter),
    ("clearfilter", Verb::ClearFilter),
    ("sa", Verb::SelectAll),
    ("selectall", Verb::SelectAll),
    ("da", Verb::DeselectAll),
    ("deselectall", Verb::DeselectAll),
    ("ec2", Verb::Service(Service::Ec2)),
    ("s3", Verb::Service(Service::S3)),
    ("eks", Verb::Service(Service::Eks)),
    ("account", Verb::Account),
    ("acc", Verb::Account),
    ("region", Verb::Region),
];

pub fn resolve(name: &str) -> Option<Verb> {
    let name = name.to_ascii_lowercase();
    VERBS
        .iter()
        .find(|(token, _)| *token == name)
        .map(|(_, verb)| *verb)
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Suggestion {
    None,
    Unique(String),
    Partial { prefix: String, matches: Vec<String> },
}

/// Prefix completion over verb spellings. Only the first word of the line is completed.
pub fn complete(input: &str) -> Suggestion {
    if input.contains(char::is_whitespace) {
        return Suggestion::None;
    }
    let prefix = input.to_ascii_lowercase();
    let mut matches = VERBS
        .iter()
        .map(|(token, _)| *token)
        .filter(|token| token.starts_with(&prefix))
        .map(str::to_string)
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Suggestion::None,
        1 => Suggestion::Unique(matches.remove(0)),
        _ => Suggestion::Partial {
            prefix: longest_common_prefix(&matches),
            matches,
        },
    }
}

fn longest_common_prefix(values: &[String]) -> String {
    let Some(first) = values.first() else {
        return String::new();
    };
    let mut len = first.len();
    for value in &values[1..] {
        len = first
            .bytes()
            .zip(value.bytes())
            .take(len)
            .take_while(|(left, right)| left == right)
            .count();
    }
    first[..len].to_string()
}

#[cfg(test)]
mod tests {
    use super::{Suggestion, Verb, complete, parse, resolve};
    use crate::model::Service;

    #[test]
    fn empty_line_is_noop() {
        assert!(parse("").is_noop());
        assert!(parse("   ").is_noop());
    }

    #[test]
    fn splits_name_and_args() {
        let command = parse("echo a b");
        assert_eq!(command.name, "echo");
        assert_eq!(command.args, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn resolves_aliases() {
        assert_eq!(resolve("acc"), Some(Verb::Account));
        assert_eq!(resolve("S3"), Some(Verb::Service(Service::S3)));
        assert_eq!(resolve("deselectall"), Some(Verb::DeselectAll));
        assert_eq!(resolve("echo"), None);
    }

    #[test]
    fn single_match_completes_in_place() {
        assert_eq!(complete("ek"), Suggestion::Unique("eks".to_string()));
        assert_eq!(complete("reg"), Suggestion::Unique("region".to_string()));
    }

    #[test]
    fn multiple_matches_offer_common_prefix() {
        match complete("re") {
            Suggestion::Partial { prefix, matches } => {
                assert_eq!(prefix, "re");
                assert_eq!(matches, vec!["refresh".to_string(), "region".to_string()]);
            }
            other => panic!("unexpected completion {other:?}"),
        }
        match complete("cl") {
            Suggestion::Unique(value) => assert_eq!(value, "clearfilter"),
            other => panic!("unexpected completion {other:?}"),
        }
        match complete("a") {
            Suggestion::Partial { prefix, .. } => assert_eq!(prefix, "acc"),
            other => panic!("unexpected completion {other:?}"),
        }
    }

    #[test]
    fn unknown_prefix_has_no_completion() {
        assert_eq!(complete("zz"), Suggestion::None);
        assert_eq!(complete("region eu"), Suggestion::None);
    }
}
