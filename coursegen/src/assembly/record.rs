//! The assembled course record and the stage payloads it is built from.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The hierarchical document produced by a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledRecord {
    /// The run this record was assembled from.
    pub run_id: Uuid,
    /// The definition the run instantiated.
    pub definition_id: String,
    /// The course.
    pub course: Course,
    /// Hex SHA-256 of the course's canonical JSON.
    pub fingerprint: String,
}

/// A course: the root of the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// Course title.
    pub title: String,
    /// Course summary.
    pub summary: String,
    /// Chapters sorted by `order`.
    pub chapters: Vec<Chapter>,
}

/// A chapter of the course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// Position within the course.
    pub order: u32,
    /// Chapter title.
    pub title: String,
    /// Chapter summary.
    pub summary: String,
    /// Lessons sorted by `order`.
    pub lessons: Vec<Lesson>,
}

/// A lesson within a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    /// Position within the chapter.
    pub order: u32,
    /// Lesson title.
    pub title: String,
    /// Lesson body.
    pub content: String,
    /// Researched concepts sorted by `order`.
    pub concepts: Vec<Concept>,
    /// Exercises sorted by `order`.
    pub exercises: Vec<Exercise>,
}

/// A concept researched for a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    /// Position within the lesson.
    pub order: u32,
    /// Concept name, referenced by exercises.
    pub name: String,
    /// Explanation.
    pub explanation: String,
}

/// Exercise formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseKind {
    /// Pick one of several answers.
    MultipleChoice,
    /// Free-text answer.
    ShortAnswer,
    /// Write code.
    Coding,
    /// Open reflection question.
    Reflection,
}

impl ExerciseKind {
    /// Wire names of every kind.
    pub const NAMES: [&'static str; 4] = ["multiple_choice", "short_answer", "coding", "reflection"];
}

/// An exercise attached to a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exercise {
    /// Position within the lesson.
    pub order: u32,
    /// Format.
    pub kind: ExerciseKind,
    /// The question.
    pub prompt: String,
    /// Reference answer.
    pub answer: String,
    /// Names of the lesson concepts this exercise practices.
    pub concepts: Vec<String>,
}

/// Output of the course slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineOutput {
    /// Course title.
    pub title: String,
    /// Course summary.
    pub summary: String,
    /// Planned chapters.
    pub chapters: Vec<ChapterOutline>,
}

/// One planned chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterOutline {
    /// Position within the course.
    pub order: u32,
    /// Chapter title.
    pub title: String,
    /// Chapter summary.
    pub summary: String,
}

/// Output of a lessons slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonsOutput {
    /// The chapter's lessons.
    pub lessons: Vec<LessonDraft>,
}

/// One generated lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonDraft {
    /// Position within the chapter.
    pub order: u32,
    /// Lesson title.
    pub title: String,
    /// Lesson body.
    pub content: String,
}

/// Output of a concepts slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptsOutput {
    /// Concepts for the chapter's lessons.
    pub concepts: Vec<ConceptDraft>,
}

/// One researched concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptDraft {
    /// Order of the lesson the concept belongs to.
    pub lesson_order: u32,
    /// Position within the lesson.
    pub order: u32,
    /// Concept name.
    pub name: String,
    /// Explanation.
    pub explanation: String,
}

/// Output of an exercises slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExercisesOutput {
    /// Exercises for the chapter's lessons.
    pub exercises: Vec<ExerciseDraft>,
}

/// One generated exercise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseDraft {
    /// Order of the lesson the exercise belongs to.
    pub lesson_order: u32,
    /// Position within the lesson.
    pub order: u32,
    /// Format.
    pub kind: ExerciseKind,
    /// The question.
    pub prompt: String,
    /// Reference answer.
    pub answer: String,
    /// Concept names practiced.
    #[serde(default)]
    pub concepts: Vec<String>,
}

impl Course {
    /// Total number of lessons.
    #[must_use]
    pub fn lesson_count(&self) -> usize {
        self.chapters.iter().map(|c| c.lessons.len()).sum()
    }

    /// Total number of exercises.
    #[must_use]
    pub fn exercise_count(&self) -> usize {
        self.chapters
            .iter()
            .flat_map(|c| &c.lessons)
            .map(|l| l.exercises.len())
            .sum()
    }
}
