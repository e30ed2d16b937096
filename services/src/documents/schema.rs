//! Registry of content collections and the rules each one enforces on write.

use serde_json::{Map, Value};
use std::fmt::Display;
use uuid::Uuid;

use crate::response::FieldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Language,
    Version,
    Book,
    Chapter,
    Verse,
    Tag,
    Dictionary,
    Example,
    SongBook,
    Songs,
    Prayer,
    DailyManna,
    Qa,
    QaCategory,
    Poster,
    PosterCategory,
    VideoCategory,
    Cms,
}

/// A body field holding the id (or ids) of documents in another collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub field: &'static str,
    pub target: Collection,
    /// The field holds an array of ids rather than a single id.
    pub many: bool,
}

const fn one(field: &'static str, target: Collection) -> Relation {
    Relation {
        field,
        target,
        many: false,
    }
}

const fn many(field: &'static str, target: Collection) -> Relation {
    Relation {
        field,
        target,
        many: true,
    }
}

const VERSION_RELATIONS: &[Relation] = &[one("language", Collection::Language)];
const BOOK_RELATIONS: &[Relation] = &[
    one("language", Collection::Language),
    one("version", Collection::Version),
];
const CHAPTER_RELATIONS: &[Relation] = &[
    one("language", Collection::Language),
    one("version", Collection::Version),
    one("book", Collection::Book),
];
const VERSE_RELATIONS: &[Relation] = &[
    one("language", Collection::Language),
    one("version", Collection::Version),
    one("book", Collection::Book),
    one("chapter", Collection::Chapter),
];
const TAG_RELATIONS: &[Relation] = &[
    one("version", Collection::Version),
    one("book", Collection::Book),
    one("chapter", Collection::Chapter),
    one("verse", Collection::Verse),
];
const DICTIONARY_RELATIONS: &[Relation] = &[
    many("tags", Collection::Tag),
    many("examples", Collection::Example),
];
const EXAMPLE_RELATIONS: &[Relation] = &[many("tags", Collection::Tag)];

const TESTAMENTS: &[&str] = &["OT", "NT", "Both"];
const FLAGS: &[&str] = &["0", "1"];
const MEDIA: &[&str] = &["Text", "Audio", "Both"];
const MEDIA_TYPES: &[&str] = &["Drama", "Non-Drama", "N/A"];

/// Whether a body is a full document or a partial update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

impl Collection {
    pub const ALL: [Self; 18] = [
        Self::Language,
        Self::Version,
        Self::Book,
        Self::Chapter,
        Self::Verse,
        Self::Tag,
        Self::Dictionary,
        Self::Example,
        Self::SongBook,
        Self::Songs,
        Self::Prayer,
        Self::DailyManna,
        Self::Qa,
        Self::QaCategory,
        Self::Poster,
        Self::PosterCategory,
        Self::VideoCategory,
        Self::Cms,
    ];

    /// Path segment and storage key.
    pub fn slug(self) -> &'static str {
        match self {
            Self::Language => "language",
            Self::Version => "version",
            Self::Book => "book",
            Self::Chapter => "chapter",
            Self::Verse => "verse",
            Self::Tag => "tag",
            Self::Dictionary => "dictionary",
            Self::Example => "example",
            Self::SongBook => "song-book",
            Self::Songs => "songs",
            Self::Prayer => "prayer",
            Self::DailyManna => "daily-manna",
            Self::Qa => "qa",
            Self::QaCategory => "qa-category",
            Self::Poster => "poster",
            Self::PosterCategory => "poster-category",
            Self::VideoCategory => "video-category",
            Self::Cms => "cms",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|collection| collection.slug() == slug)
    }

    /// Human readable name used in response messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Language => "Language",
            Self::Version => "Version",
            Self::Book => "Book",
            Self::Chapter => "Chapter",
            Self::Verse => "Verse",
            Self::Tag => "Tag",
            Self::Dictionary => "Dictionary",
            Self::Example => "Example",
            Self::SongBook => "Song book",
            Self::Songs => "Song",
            Self::Prayer => "Prayer",
            Self::DailyManna => "Daily manna",
            Self::Qa => "QA",
            Self::QaCategory => "QA category",
            Self::Poster => "Poster",
            Self::PosterCategory => "Poster category",
            Self::VideoCategory => "Video category",
            Self::Cms => "Content",
        }
    }

    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Language => &["language_code", "language_name", "english_name"],
            Self::Version => &[
                "language",
                "version_code",
                "english_name",
                "volume_name",
                "collection_code",
                "media",
                "media_type",
            ],
            Self::Book => &[
                "language",
                "version",
                "collection_code",
                "book_id",
                "book_name",
            ],
            Self::Chapter => &["language", "version", "book", "chapter_id", "chapter_name"],
            Self::Verse => &[
                "language",
                "version",
                "book",
                "chapter",
                "verse_text",
                "verse_id",
            ],
            Self::Tag => &[],
            Self::Dictionary => &["word", "word_in_english", "defination", "tags"],
            Self::Example => &["tags"],
            Self::SongBook => &["name", "image"],
            Self::Songs => &["book_name", "song_title", "lyrics"],
            Self::Prayer => &["email"],
            Self::DailyManna => &["title", "description", "date"],
            Self::Qa => &["category", "question", "answer"],
            Self::QaCategory | Self::PosterCategory | Self::VideoCategory => &["name"],
            Self::Poster => &["poster_category", "title"],
            Self::Cms => &["title", "content"],
        }
    }

    /// Fields restricted to a closed set of string values.
    pub fn enum_fields(self) -> &'static [(&'static str, &'static [&'static str])] {
        match self {
            Self::Language => &[("verse_text", FLAGS), ("audio", FLAGS), ("popular", FLAGS)],
            Self::Version => &[
                ("collection_code", TESTAMENTS),
                ("media", MEDIA),
                ("media_type", MEDIA_TYPES),
            ],
            Self::Book => &[("collection_code", TESTAMENTS)],
            Self::Songs => &[("status", FLAGS)],
            _ => &[],
        }
    }

    /// Values filled in on create when the body omits them.
    pub fn defaults(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Language => &[
                ("verse_text", "0"),
                ("audio", "0"),
                ("popular", "0"),
                ("status", "1"),
            ],
            Self::Tag | Self::Example | Self::Prayer | Self::DailyManna => &[],
            _ => &[("status", "1")],
        }
    }

    pub fn relations(self) -> &'static [Relation] {
        match self {
            Self::Version => VERSION_RELATIONS,
            Self::Book => BOOK_RELATIONS,
            Self::Chapter => CHAPTER_RELATIONS,
            Self::Verse => VERSE_RELATIONS,
            Self::Tag => TAG_RELATIONS,
            Self::Dictionary => DICTIONARY_RELATIONS,
            Self::Example => EXAMPLE_RELATIONS,
            _ => &[],
        }
    }

    /// Field holding a unique code that path lookups accept in place of the
    /// id.
    pub fn code_field(self) -> Option<&'static str> {
        match self {
            Self::Language => Some("language_code"),
            Self::Version => Some("version_code"),
            _ => None,
        }
    }

    /// Field a reader names this collection's documents by.
    pub fn name_field(self) -> Option<&'static str> {
        match self {
            Self::Language => Some("language_name"),
            Self::Version => Some("volume_name"),
            Self::Book => Some("book_name"),
            Self::Chapter => Some("chapter_name"),
            _ => None,
        }
    }

    /// Collections that also answer list, create and delete-all on their root
    /// path and read, update and delete on `/{id}`.
    pub fn has_root_routes(self) -> bool {
        matches!(self, Self::Prayer | Self::DailyManna)
    }

    pub fn relation(self, field: &str) -> Option<Relation> {
        self.relations()
            .iter()
            .find(|relation| relation.field == field)
            .copied()
    }

    pub fn apply_defaults(self, body: &mut Map<String, Value>) {
        for (field, value) in self.defaults() {
            body.entry(*field)
                .or_insert_with(|| Value::String((*value).to_owned()));
        }
    }

    /// Checks a body against this collection's rules and reports every
    /// offending field.
    pub fn validate(self, body: &Map<String, Value>, mode: WriteMode) -> Vec<FieldError> {
        let mut errors = Vec::new();

        for field in self.required_fields() {
            match body.get(*field) {
                None if mode == WriteMode::Create => {
                    errors.push(FieldError::new(*field, format!("{field} is required")));
                }
                Some(value) if is_blank(value) => {
                    errors.push(FieldError::new(*field, format!("{field} must not be empty")));
                }
                _ => {}
            }
        }

        for (field, allowed) in self.enum_fields() {
            let Some(value) = body.get(*field) else {
                continue;
            };
            let accepted = value
                .as_str()
                .is_some_and(|value| allowed.contains(&value));
            if !accepted {
                errors.push(FieldError::new(
                    *field,
                    format!("{field} must be one of {}", allowed.join(", ")),
                ));
            }
        }

        for relation in self.relations() {
            let Some(value) = body.get(relation.field) else {
                continue;
            };
            if value.is_null() && !self.required_fields().contains(&relation.field) {
                continue;
            }
            let well_formed = if relation.many {
                value
                    .as_array()
                    .is_some_and(|ids| ids.iter().all(is_uuid_string))
            } else {
                is_uuid_string(value)
            };
            if !well_formed {
                let expected = if relation.many {
                    format!("a list of {} ids", relation.target.label())
                } else {
                    format!("a {} id", relation.target.label())
                };
                errors.push(FieldError::new(
                    relation.field,
                    format!("{} must be {expected}", relation.field),
                ));
            }
        }

        errors
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn is_uuid_string(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|raw| Uuid::parse_str(raw).is_ok())
}
