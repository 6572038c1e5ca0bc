//! Cross-stage consistency of slot outputs.
//!
//! Runs inside every attempt, after structural validation and before the
//! stage succeeds. An output that could never be assembled fails the attempt
//! with a [`SchemaMismatch`] and costs a retry like any malformed output.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::record::{ConceptsOutput, ExercisesOutput, LessonsOutput, OutlineOutput};
use crate::errors::SchemaMismatch;
use crate::pipeline::PipelineDefinition;
use crate::schema::deserialize;
use crate::stages::{HierarchySlot, StageDefinition};

/// Checks `output` of `stage` against the outputs of its dependencies.
///
/// - the course outline has unique chapter orders and a chapter for every
///   chapter slot wired into `definition`
/// - order values are unique among siblings
/// - concepts and exercises reference lessons of their chapter, and exercises
///   only name concepts of their lesson
///
/// References are only checked against dependencies present in `upstream`.
///
/// # Errors
///
/// The first inconsistency, located by its JSON path in `output`.
pub fn check_slot_output(
    definition: &PipelineDefinition,
    stage: &StageDefinition,
    output: &Value,
    upstream: &BTreeMap<String, Value>,
) -> Result<(), SchemaMismatch> {
    match stage.slot {
        HierarchySlot::Course => check_outline(definition, output),
        HierarchySlot::Lessons { .. } => check_lessons(output),
        HierarchySlot::Concepts { chapter } => {
            check_concepts(definition, chapter, output, upstream)
        }
        HierarchySlot::Exercises { chapter } => {
            check_exercises(definition, chapter, output, upstream)
        }
        HierarchySlot::Auxiliary => Ok(()),
    }
}

fn check_outline(definition: &PipelineDefinition, output: &Value) -> Result<(), SchemaMismatch> {
    let outline: OutlineOutput = deserialize(output)?;

    let mut orders = BTreeSet::new();
    for (i, chapter) in outline.chapters.iter().enumerate() {
        if !orders.insert(chapter.order) {
            return Err(SchemaMismatch::new(
                format!("$.chapters[{i}].order"),
                format!("duplicate chapter order {}", chapter.order),
            ));
        }
    }

    let wired: BTreeSet<u32> = definition
        .stages()
        .iter()
        .filter_map(|stage| stage.slot.chapter())
        .collect();
    if let Some(missing) = wired.difference(&orders).next() {
        return Err(SchemaMismatch::new(
            "$.chapters",
            format!("no chapter with order {missing}; expected orders {wired:?}"),
        ));
    }
    Ok(())
}

fn check_lessons(output: &Value) -> Result<(), SchemaMismatch> {
    let lessons: LessonsOutput = deserialize(output)?;
    let mut orders = BTreeSet::new();
    for (i, lesson) in lessons.lessons.iter().enumerate() {
        if !orders.insert(lesson.order) {
            return Err(SchemaMismatch::new(
                format!("$.lessons[{i}].order"),
                format!("duplicate lesson order {}", lesson.order),
            ));
        }
    }
    Ok(())
}

fn check_concepts(
    definition: &PipelineDefinition,
    chapter: u32,
    output: &Value,
    upstream: &BTreeMap<String, Value>,
) -> Result<(), SchemaMismatch> {
    let concepts: ConceptsOutput = deserialize(output)?;
    let lessons = lesson_orders(definition, chapter, upstream)?;

    let mut seen = BTreeSet::new();
    for (i, concept) in concepts.concepts.iter().enumerate() {
        if let Some(lessons) = &lessons {
            if !lessons.contains(&concept.lesson_order) {
                return Err(SchemaMismatch::new(
                    format!("$.concepts[{i}].lesson_order"),
                    format!("chapter {chapter} has no lesson with order {}", concept.lesson_order),
                ));
            }
        }
        if !seen.insert((concept.lesson_order, concept.order)) {
            return Err(SchemaMismatch::new(
                format!("$.concepts[{i}].order"),
                format!(
                    "duplicate concept order {} in lesson {}",
                    concept.order, concept.lesson_order
                ),
            ));
        }
    }
    Ok(())
}

fn check_exercises(
    definition: &PipelineDefinition,
    chapter: u32,
    output: &Value,
    upstream: &BTreeMap<String, Value>,
) -> Result<(), SchemaMismatch> {
    let exercises: ExercisesOutput = deserialize(output)?;
    let lessons = lesson_orders(definition, chapter, upstream)?;
    let concepts: Option<ConceptsOutput> =
        upstream_payload(definition, HierarchySlot::Concepts { chapter }, upstream)?;
    let names: Option<BTreeMap<u32, BTreeSet<String>>> = concepts.map(|concepts| {
        let mut names: BTreeMap<u32, BTreeSet<String>> = BTreeMap::new();
        for concept in concepts.concepts {
            names.entry(concept.lesson_order).or_default().insert(concept.name);
        }
        names
    });

    let mut seen = BTreeSet::new();
    for (i, exercise) in exercises.exercises.iter().enumerate() {
        let lesson = exercise.lesson_order;
        if let Some(lessons) = &lessons {
            if !lessons.contains(&lesson) {
                return Err(SchemaMismatch::new(
                    format!("$.exercises[{i}].lesson_order"),
                    format!("chapter {chapter} has no lesson with order {lesson}"),
                ));
            }
        }
        if let Some(names) = &names {
            let known = names.get(&lesson);
            for (j, concept) in exercise.concepts.iter().enumerate() {
                if !known.is_some_and(|known| known.contains(concept)) {
                    return Err(SchemaMismatch::new(
                        format!("$.exercises[{i}].concepts[{j}]"),
                        format!("lesson {lesson} has no concept named '{concept}'"),
                    ));
                }
            }
        }
        if !seen.insert((lesson, exercise.order)) {
            return Err(SchemaMismatch::new(
                format!("$.exercises[{i}].order"),
                format!("duplicate exercise order {} in lesson {lesson}", exercise.order),
            ));
        }
    }
    Ok(())
}

fn lesson_orders(
    definition: &PipelineDefinition,
    chapter: u32,
    upstream: &BTreeMap<String, Value>,
) -> Result<Option<BTreeSet<u32>>, SchemaMismatch> {
    let lessons: Option<LessonsOutput> =
        upstream_payload(definition, HierarchySlot::Lessons { chapter }, upstream)?;
    Ok(lessons.map(|lessons| lessons.lessons.iter().map(|lesson| lesson.order).collect()))
}

/// Decodes the output of the dependency filling `slot`, if there is one.
fn upstream_payload<T: DeserializeOwned>(
    definition: &PipelineDefinition,
    slot: HierarchySlot,
    upstream: &BTreeMap<String, Value>,
) -> Result<Option<T>, SchemaMismatch> {
    let Some(raw) = definition
        .stages_in_slot(slot)
        .find_map(|stage| upstream.get(&stage.name))
    else {
        return Ok(None);
    };
    deserialize(raw)
        .map(Some)
        .map_err(|e| SchemaMismatch::new("$", format!("upstream output unreadable: {}", e.message)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::{concepts_stage, exercises_stage, lessons_stage, CourseBlueprint, OUTLINE_STAGE};
    use serde_json::json;

    fn definition(chapters: u32) -> PipelineDefinition {
        CourseBlueprint::new(chapters).definition("course").unwrap()
    }

    fn check(
        definition: &PipelineDefinition,
        stage: &str,
        output: &Value,
        upstream: &[(&str, Value)],
    ) -> Result<(), SchemaMismatch> {
        let upstream = upstream
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect();
        check_slot_output(definition, definition.stage(stage).unwrap(), output, &upstream)
    }

    fn outline(orders: &[u32]) -> Value {
        let chapters: Vec<Value> = orders
            .iter()
            .map(|order| json!({ "order": order, "title": "t", "summary": "s" }))
            .collect();
        json!({ "title": "Course", "summary": "s", "chapters": chapters })
    }

    fn lessons() -> Value {
        json!({ "lessons": [
            { "order": 0, "title": "a", "content": "c" },
            { "order": 1, "title": "b", "content": "c" },
        ]})
    }

    #[test]
    fn test_outline_must_cover_wired_chapters() {
        let definition = definition(2);
        assert!(check(&definition, OUTLINE_STAGE, &outline(&[1, 0, 5]), &[]).is_ok());

        let err = check(&definition, OUTLINE_STAGE, &outline(&[1]), &[]).unwrap_err();
        assert_eq!(err.path, "$.chapters");
        assert!(err.message.contains("no chapter with order 0"));

        let err = check(&definition, OUTLINE_STAGE, &outline(&[0, 1, 0]), &[]).unwrap_err();
        assert_eq!(err.path, "$.chapters[2].order");
    }

    #[test]
    fn test_duplicate_lesson_order() {
        let definition = definition(1);
        let output = json!({ "lessons": [
            { "order": 0, "title": "a", "content": "c" },
            { "order": 0, "title": "b", "content": "c" },
        ]});
        let err = check(&definition, &lessons_stage(0), &output, &[]).unwrap_err();
        assert_eq!(err.path, "$.lessons[1].order");
    }

    #[test]
    fn test_concepts_reference_upstream_lessons() {
        let definition = definition(1);
        let stage = concepts_stage(0);
        let lessons_name = lessons_stage(0);
        let upstream = [(lessons_name.as_str(), lessons())];

        let ok = json!({ "concepts": [
            { "lesson_order": 1, "order": 0, "name": "move", "explanation": "e" },
        ]});
        assert!(check(&definition, &stage, &ok, &upstream).is_ok());

        let dangling = json!({ "concepts": [
            { "lesson_order": 0, "order": 0, "name": "move", "explanation": "e" },
            { "lesson_order": 7, "order": 0, "name": "borrow", "explanation": "e" },
        ]});
        let err = check(&definition, &stage, &dangling, &upstream).unwrap_err();
        assert_eq!(err.path, "$.concepts[1].lesson_order");

        // Without the lessons output there is nothing to check against.
        assert!(check(&definition, &stage, &dangling, &[]).is_ok());
    }

    #[test]
    fn test_exercises_reference_lesson_concepts() {
        let definition = definition(1);
        let stage = exercises_stage(0);
        let lessons_name = lessons_stage(0);
        let concepts_name = concepts_stage(0);
        let concepts = json!({ "concepts": [
            { "lesson_order": 0, "order": 0, "name": "move", "explanation": "e" },
            { "lesson_order": 1, "order": 0, "name": "borrow", "explanation": "e" },
        ]});
        let upstream = [
            (lessons_name.as_str(), lessons()),
            (concepts_name.as_str(), concepts),
        ];

        let exercise = |lesson: u32, concept: &str| {
            json!({ "exercises": [{
                "lesson_order": lesson,
                "order": 0,
                "kind": "coding",
                "prompt": "p",
                "answer": "a",
                "concepts": [concept],
            }]})
        };

        assert!(check(&definition, &stage, &exercise(0, "move"), &upstream).is_ok());

        let err = check(&definition, &stage, &exercise(0, "borrow"), &upstream).unwrap_err();
        assert_eq!(err.path, "$.exercises[0].concepts[0]");

        let err = check(&definition, &stage, &exercise(3, "move"), &upstream).unwrap_err();
        assert_eq!(err.path, "$.exercises[0].lesson_order");
    }
}
