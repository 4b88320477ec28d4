//! Lenient deserializers for loosely structured model output.

use serde::{Deserialize, Deserializer};

/// A list field that may arrive as a single string or an array of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringOrList(pub Vec<String>);

impl<'de> Deserialize<'de> for StringOrList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
            Missing(()),
        }

        let items = match Raw::deserialize(deserializer)? {
            Raw::One(item) => vec![item],
            Raw::Many(items) => items,
            Raw::Missing(()) => Vec::new(),
        };
        Ok(Self(
            items
                .into_iter()
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
        ))
    }
}

impl From<StringOrList> for Vec<String> {
    fn from(list: StringOrList) -> Self {
        list.0
    }
}

/// `deserialize_with` adapter producing a plain `Vec<String>`.
pub fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrList::deserialize(deserializer).map(Vec::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "string_or_list")]
        items: Vec<String>,
    }

    fn parse(json: &str) -> Vec<String> {
        serde_json::from_str::<Probe>(json).expect("json").items
    }

    #[test]
    fn accepts_string_array_null_and_missing() {
        assert_eq!(parse(r#"{"items": "one"}"#), vec!["one"]);
        assert_eq!(parse(r#"{"items": ["a", " ", "b "]}"#), vec!["a", "b"]);
        assert!(parse(r#"{"items": null}"#).is_empty());
        assert!(parse("{}").is_empty());
    }
}
