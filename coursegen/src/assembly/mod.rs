//! Assembly of stage outputs into the hierarchical course record.
//!
//! Only outputs of succeeded stages are read. Children are ordered by the
//! explicit `order` value every payload carries, never by arrival order.

mod assembler;
mod consistency;
mod record;

pub use assembler::{assemble, fingerprint, Assembler};
pub use consistency::check_slot_output;
pub use record::{
    AssembledRecord, Chapter, ChapterOutline, Concept, ConceptDraft, ConceptsOutput, Course,
    Exercise, ExerciseDraft, ExerciseKind, ExercisesOutput, Lesson, LessonDraft, LessonsOutput,
    OutlineOutput,
};
