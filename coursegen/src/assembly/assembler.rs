//! Merges succeeded stage outputs into the course hierarchy.

use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use super::record::{
    AssembledRecord, Chapter, Concept, ConceptsOutput, Course, Exercise, ExercisesOutput, Lesson,
    LessonsOutput, OutlineOutput,
};
use crate::core::{PipelineRun, RunStatus};
use crate::errors::AssemblyError;
use crate::pipeline::PipelineDefinition;
use crate::schema::deserialize;
use crate::stages::{HierarchySlot, StageDefinition};

/// Assembles `run` into a record.
///
/// Pure function of the run's succeeded outputs and the definition's stage
/// slots: assembling the same run twice yields identical records.
///
/// # Errors
///
/// [`AssemblyError::IncompletePipeline`] unless the run is completed, and
/// conflict or shape errors when outputs disagree with one another.
pub fn assemble(
    definition: &PipelineDefinition,
    run: &PipelineRun,
) -> Result<AssembledRecord, AssemblyError> {
    if run.status != RunStatus::Completed {
        return Err(AssemblyError::IncompletePipeline {
            run_id: run.id,
            status: run.status,
        });
    }

    let outputs = run.outputs();
    let mut course = Assembly::from_outline(definition, &outputs)?;

    for stage in definition.stages() {
        if let HierarchySlot::Lessons { chapter } = stage.slot {
            let payload: LessonsOutput = payload(stage, &outputs)?;
            course.attach_lessons(stage, chapter, payload)?;
        }
    }
    for stage in definition.stages() {
        if let HierarchySlot::Concepts { chapter } = stage.slot {
            let payload: ConceptsOutput = payload(stage, &outputs)?;
            course.attach_concepts(stage, chapter, payload)?;
        }
    }
    for stage in definition.stages() {
        if let HierarchySlot::Exercises { chapter } = stage.slot {
            let payload: ExercisesOutput = payload(stage, &outputs)?;
            course.attach_exercises(stage, chapter, payload)?;
        }
    }

    let course = course.finish();
    let fingerprint = fingerprint(&course);

    tracing::debug!(
        run_id = %run.id,
        chapters = course.chapters.len(),
        fingerprint = %fingerprint,
        "Assembled course record"
    );

    Ok(AssembledRecord {
        run_id: run.id,
        definition_id: run.definition_id.clone(),
        course,
        fingerprint,
    })
}

/// Hex SHA-256 of the course's JSON encoding.
///
/// Struct fields serialize in declaration order and every list is sorted, so
/// the encoding is canonical.
#[must_use]
pub fn fingerprint(course: &Course) -> String {
    let mut hasher = Sha256::new();
    // Serializing plain structs of strings and integers cannot fail.
    let bytes = serde_json::to_vec(course).unwrap_or_default();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

fn payload<T: DeserializeOwned>(
    stage: &StageDefinition,
    outputs: &BTreeMap<String, Value>,
) -> Result<T, AssemblyError> {
    let raw = outputs.get(&stage.name).ok_or_else(|| AssemblyError::Conflict {
        stage: stage.name.clone(),
        message: "stage has no recorded output".to_string(),
    })?;
    deserialize(raw).map_err(|mismatch| AssemblyError::InvalidOutput {
        stage: stage.name.clone(),
        mismatch,
    })
}

fn conflict(stage: &StageDefinition, message: impl Into<String>) -> AssemblyError {
    AssemblyError::Conflict {
        stage: stage.name.clone(),
        message: message.into(),
    }
}

/// Course under construction, keyed by order values.
struct Assembly {
    title: String,
    summary: String,
    chapters: BTreeMap<u32, PartialChapter>,
}

struct PartialChapter {
    title: String,
    summary: String,
    lessons: Option<BTreeMap<u32, PartialLesson>>,
}

struct PartialLesson {
    title: String,
    content: String,
    concepts: BTreeMap<u32, Concept>,
    exercises: BTreeMap<u32, Exercise>,
}

impl Assembly {
    fn from_outline(
        definition: &PipelineDefinition,
        outputs: &BTreeMap<String, Value>,
    ) -> Result<Self, AssemblyError> {
        let mut course_stages = definition.stages_in_slot(HierarchySlot::Course);
        let stage = course_stages.next().ok_or(AssemblyError::MissingCourse)?;
        if let Some(extra) = course_stages.next() {
            return Err(conflict(extra, format!("course slot already filled by '{}'", stage.name)));
        }

        let outline: OutlineOutput = payload(stage, outputs)?;
        let mut chapters = BTreeMap::new();
        for chapter in outline.chapters {
            let order = chapter.order;
            let partial = PartialChapter {
                title: chapter.title,
                summary: chapter.summary,
                lessons: None,
            };
            if chapters.insert(order, partial).is_some() {
                return Err(conflict(stage, format!("duplicate chapter order {order}")));
            }
        }

        Ok(Self {
            title: outline.title,
            summary: outline.summary,
            chapters,
        })
    }

    fn chapter_mut(
        &mut self,
        stage: &StageDefinition,
        chapter: u32,
    ) -> Result<&mut PartialChapter, AssemblyError> {
        self.chapters
            .get_mut(&chapter)
            .ok_or_else(|| conflict(stage, format!("outline has no chapter with order {chapter}")))
    }

    fn attach_lessons(
        &mut self,
        stage: &StageDefinition,
        chapter: u32,
        payload: LessonsOutput,
    ) -> Result<(), AssemblyError> {
        let target = self.chapter_mut(stage, chapter)?;
        if target.lessons.is_some() {
            return Err(conflict(stage, format!("lessons of chapter {chapter} already assembled")));
        }

        let mut lessons = BTreeMap::new();
        for lesson in payload.lessons {
            let order = lesson.order;
            let partial = PartialLesson {
                title: lesson.title,
                content: lesson.content,
                concepts: BTreeMap::new(),
                exercises: BTreeMap::new(),
            };
            if lessons.insert(order, partial).is_some() {
                return Err(conflict(stage, format!("duplicate lesson order {order}")));
            }
        }
        target.lessons = Some(lessons);
        Ok(())
    }

    fn lesson_mut<'a>(
        chapter_lessons: &'a mut Option<BTreeMap<u32, PartialLesson>>,
        stage: &StageDefinition,
        chapter: u32,
        lesson: u32,
    ) -> Result<&'a mut PartialLesson, AssemblyError> {
        chapter_lessons
            .as_mut()
            .ok_or_else(|| conflict(stage, format!("chapter {chapter} has no lessons")))?
            .get_mut(&lesson)
            .ok_or_else(|| {
                conflict(stage, format!("chapter {chapter} has no lesson with order {lesson}"))
            })
    }

    fn attach_concepts(
        &mut self,
        stage: &StageDefinition,
        chapter: u32,
        payload: ConceptsOutput,
    ) -> Result<(), AssemblyError> {
        let target = self.chapter_mut(stage, chapter)?;
        for concept in payload.concepts {
            let lesson = Self::lesson_mut(&mut target.lessons, stage, chapter, concept.lesson_order)?;
            let order = concept.order;
            let entry = Concept {
                order,
                name: concept.name,
                explanation: concept.explanation,
            };
            if lesson.concepts.insert(order, entry).is_some() {
                return Err(conflict(
                    stage,
                    format!("duplicate concept order {order} in lesson {}", concept.lesson_order),
                ));
            }
        }
        Ok(())
    }

    fn attach_exercises(
        &mut self,
        stage: &StageDefinition,
        chapter: u32,
        payload: ExercisesOutput,
    ) -> Result<(), AssemblyError> {
        let target = self.chapter_mut(stage, chapter)?;
        for exercise in payload.exercises {
            let lesson_order = exercise.lesson_order;
            let lesson = Self::lesson_mut(&mut target.lessons, stage, chapter, lesson_order)?;

            let known: BTreeSet<&str> = lesson.concepts.values().map(|c| c.name.as_str()).collect();
            if let Some(unknown) = exercise.concepts.iter().find(|c| !known.contains(c.as_str())) {
                return Err(conflict(
                    stage,
                    format!("exercise references unknown concept '{unknown}' in lesson {lesson_order}"),
                ));
            }

            let order = exercise.order;
            let entry = Exercise {
                order,
                kind: exercise.kind,
                prompt: exercise.prompt,
                answer: exercise.answer,
                concepts: exercise.concepts,
            };
            if lesson.exercises.insert(order, entry).is_some() {
                return Err(conflict(
                    stage,
                    format!("duplicate exercise order {order} in lesson {lesson_order}"),
                ));
            }
        }
        Ok(())
    }

    fn finish(self) -> Course {
        let chapters = self
            .chapters
            .into_iter()
            .map(|(order, chapter)| Chapter {
                order,
                title: chapter.title,
                summary: chapter.summary,
                lessons: chapter
                    .lessons
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(order, lesson)| Lesson {
                        order,
                        title: lesson.title,
                        content: lesson.content,
                        concepts: lesson.concepts.into_values().collect(),
                        exercises: lesson.exercises.into_values().collect(),
                    })
                    .collect(),
            })
            .collect();

        Course {
            title: self.title,
            summary: self.summary,
            chapters,
        }
    }
}

/// Stateless assembler handle, for callers that prefer an object.
#[derive(Debug, Clone, Copy, Default)]
pub struct Assembler;

impl Assembler {
    /// Creates an assembler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// See [`assemble`].
    ///
    /// # Errors
    ///
    /// See [`assemble`].
    pub fn assemble(
        &self,
        definition: &PipelineDefinition,
        run: &PipelineRun,
    ) -> Result<AssembledRecord, AssemblyError> {
        assemble(definition, run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageStatus;
    use crate::pipeline::PipelineBuilder;
    use crate::schema::SchemaDescriptor;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn definition() -> PipelineDefinition {
        PipelineBuilder::new("course")
            .stage(StageDefinition::new("outline", SchemaDescriptor::Any).with_slot(HierarchySlot::Course))
            .stage(
                StageDefinition::new("chapter-0-lessons", SchemaDescriptor::Any)
                    .with_dependency("outline")
                    .with_slot(HierarchySlot::Lessons { chapter: 0 }),
            )
            .stage(
                StageDefinition::new("chapter-0-concepts", SchemaDescriptor::Any)
                    .with_dependency("chapter-0-lessons")
                    .with_slot(HierarchySlot::Concepts { chapter: 0 }),
            )
            .stage(
                StageDefinition::new("chapter-0-exercises", SchemaDescriptor::Any)
                    .with_dependency("chapter-0-concepts")
                    .with_slot(HierarchySlot::Exercises { chapter: 0 }),
            )
            .build()
            .unwrap()
    }

    fn completed_run(definition: &PipelineDefinition, outputs: &[(&str, Value)]) -> PipelineRun {
        let mut run = PipelineRun::new(definition, json!({"topic": "rust"}));
        for (stage, output) in outputs {
            let exec = run.stages.get_mut(*stage).unwrap();
            exec.status = StageStatus::Succeeded;
            exec.attempts = 1;
            exec.output = Some(output.clone());
        }
        run.status = RunStatus::Completed;
        run
    }

    fn outputs() -> Vec<(&'static str, Value)> {
        vec![
            (
                "outline",
                json!({
                    "title": "Rust",
                    "summary": "Systems programming",
                    "chapters": [
                        {"order": 2, "title": "Async", "summary": "c"},
                        {"order": 0, "title": "Basics", "summary": "a"},
                        {"order": 1, "title": "Ownership", "summary": "b"}
                    ]
                }),
            ),
            (
                "chapter-0-lessons",
                json!({"lessons": [
                    {"order": 1, "title": "Types", "content": "..."},
                    {"order": 0, "title": "Hello", "content": "..."}
                ]}),
            ),
            (
                "chapter-0-concepts",
                json!({"concepts": [
                    {"lesson_order": 0, "order": 1, "name": "macros", "explanation": "..."},
                    {"lesson_order": 0, "order": 0, "name": "main", "explanation": "..."}
                ]}),
            ),
            (
                "chapter-0-exercises",
                json!({"exercises": [
                    {"lesson_order": 0, "order": 0, "kind": "coding", "prompt": "p", "answer": "a", "concepts": ["main"]}
                ]}),
            ),
        ]
    }

    #[test]
    fn test_assemble_sorts_by_order() {
        let definition = definition();
        let run = completed_run(&definition, &outputs());

        let record = assemble(&definition, &run).unwrap();
        let orders: Vec<u32> = record.course.chapters.iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        assert_eq!(record.course.chapters[0].title, "Basics");

        let lessons = &record.course.chapters[0].lessons;
        assert_eq!(lessons[0].title, "Hello");
        assert_eq!(lessons[0].concepts[0].name, "main");
        assert_eq!(lessons[0].concepts[1].name, "macros");
        assert_eq!(lessons[0].exercises.len(), 1);
        assert!(record.course.chapters[1].lessons.is_empty());
        assert_eq!(record.course.lesson_count(), 2);
        assert_eq!(record.course.exercise_count(), 1);
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let definition = definition();
        let run = completed_run(&definition, &outputs());

        let first = assemble(&definition, &run).unwrap();
        let second = Assembler::new().assemble(&definition, &run).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(first.fingerprint.len(), 64);
    }

    #[test]
    fn test_incomplete_run_rejected() {
        let definition = definition();
        let mut run = completed_run(&definition, &outputs());
        run.status = RunStatus::Failed;

        let err = assemble(&definition, &run).unwrap_err();
        assert!(matches!(
            err,
            AssemblyError::IncompletePipeline { status: RunStatus::Failed, .. }
        ));
    }

    #[test]
    fn test_duplicate_chapter_order_conflicts() {
        let definition = definition();
        let mut outputs = outputs();
        outputs[0].1["chapters"][1]["order"] = json!(2);
        let run = completed_run(&definition, &outputs);

        let err = assemble(&definition, &run).unwrap_err();
        assert!(matches!(err, AssemblyError::Conflict { ref stage, .. } if stage == "outline"));
    }

    #[test]
    fn test_unknown_lesson_reference_conflicts() {
        let definition = definition();
        let mut outputs = outputs();
        outputs[2].1["concepts"][0]["lesson_order"] = json!(7);
        let run = completed_run(&definition, &outputs);

        let err = assemble(&definition, &run).unwrap_err();
        assert!(matches!(err, AssemblyError::Conflict { ref stage, .. } if stage == "chapter-0-concepts"));
    }

    #[test]
    fn test_unknown_concept_reference_conflicts() {
        let definition = definition();
        let mut outputs = outputs();
        outputs[3].1["exercises"][0]["concepts"] = json!(["lifetimes"]);
        let run = completed_run(&definition, &outputs);

        let err = assemble(&definition, &run).unwrap_err();
        assert!(err.to_string().contains("lifetimes"));
    }

    #[test]
    fn test_malformed_payload_is_invalid_output() {
        let definition = definition();
        let mut outputs = outputs();
        outputs[1].1 = json!({"lessons": "none"});
        let run = completed_run(&definition, &outputs);

        let err = assemble(&definition, &run).unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidOutput { ref stage, .. } if stage == "chapter-0-lessons"));
    }

    #[test]
    fn test_missing_course_slot() {
        let definition = PipelineBuilder::new("bare")
            .stage(StageDefinition::new("notes", SchemaDescriptor::Any))
            .build()
            .unwrap();
        let run = completed_run(&definition, &[("notes", json!({}))]);
        assert!(matches!(
            assemble(&definition, &run).unwrap_err(),
            AssemblyError::MissingCourse
        ));
    }
}
