//! Output schemas of the standard course stages.

use crate::assembly::ExerciseKind;
use crate::schema::{FieldSchema, SchemaDescriptor};

fn text(name: &str) -> FieldSchema {
    FieldSchema::required(name, SchemaDescriptor::String)
}

fn order(name: &str) -> FieldSchema {
    FieldSchema::required(name, SchemaDescriptor::Unsigned)
}

/// Course title, summary and at least `chapters` planned chapters.
#[must_use]
pub fn outline(chapters: usize) -> SchemaDescriptor {
    SchemaDescriptor::object([
        text("title"),
        text("summary"),
        FieldSchema::required(
            "chapters",
            SchemaDescriptor::array_min(
                SchemaDescriptor::object([order("order"), text("title"), text("summary")]),
                chapters,
            ),
        ),
    ])
}

/// A chapter's lessons.
#[must_use]
pub fn lessons() -> SchemaDescriptor {
    SchemaDescriptor::object([FieldSchema::required(
        "lessons",
        SchemaDescriptor::array_min(
            SchemaDescriptor::object([order("order"), text("title"), text("content")]),
            1,
        ),
    )])
}

/// Concepts for a chapter's lessons.
#[must_use]
pub fn concepts() -> SchemaDescriptor {
    SchemaDescriptor::object([FieldSchema::required(
        "concepts",
        SchemaDescriptor::array(SchemaDescriptor::object([
            order("lesson_order"),
            order("order"),
            text("name"),
            text("explanation"),
        ])),
    )])
}

/// Exercises for a chapter's lessons.
#[must_use]
pub fn exercises() -> SchemaDescriptor {
    SchemaDescriptor::object([FieldSchema::required(
        "exercises",
        SchemaDescriptor::array(SchemaDescriptor::object([
            order("lesson_order"),
            order("order"),
            FieldSchema::required("kind", SchemaDescriptor::enumeration(ExerciseKind::NAMES)),
            text("prompt"),
            text("answer"),
            FieldSchema::optional("concepts", SchemaDescriptor::array(SchemaDescriptor::String)),
        ])),
    )])
}
