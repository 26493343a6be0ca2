//! Typed-form positional extraction (spec.md §4.5a): no LLM call. Fields are
//! pulled by spatial proximity to a recognized bilingual label, the same
//! label-matching approach `analyzer.rs`'s `LABEL_BAG`/`score_top_strip`
//! uses for structure detection — here applied line-by-line instead of to a
//! rasterized header strip.

use crate::model::{ExtractedFields, Grade};

/// `(field, [English aliases], [Spanish aliases])`. Same-line value after
/// any alias is taken as the field's value.
const SAME_LINE_LABELS: &[(&str, &[&str])] = &[
    ("student_name", &["student's name", "student name", "nombre del estudiante"]),
    ("father_figure_name", &["father figure", "father-figure", "padre"]),
    ("phone", &["phone", "telefono", "teléfono"]),
    ("email", &["email", "e-mail", "correo"]),
    ("teacher_name", &["teacher", "maestro", "maestra"]),
    ("city_or_location", &["city", "location", "ciudad"]),
];

const SCHOOL_LABELS: &[&str] = &["school", "escuela"];
const GRADE_LABELS: &[&str] = &["grade", "grado"];

/// Extract fields from `text` by label proximity. Returns fields with
/// `essay_text` set to `essay_block` verbatim (the typed-form essay body
/// has no further extraction to do beyond segmentation).
pub fn extract(text: &str, essay_block: &str) -> ExtractedFields {
    let lines: Vec<&str> = text.lines().collect();
    let mut fields = ExtractedFields {
        essay_text: non_blank(essay_block),
        ..Default::default()
    };

    for (field, aliases) in SAME_LINE_LABELS {
        if let Some(value) = find_same_line_value(&lines, aliases) {
            assign(&mut fields, field, value);
        }
    }

    if let Some(value) = find_same_line_value(&lines, SCHOOL_LABELS) {
        fields.school_name = Some(value);
    }

    if let Some(value) = find_same_line_value(&lines, GRADE_LABELS)
        && let Some(grade) = Grade::parse(&value)
    {
        fields.grade = Some(grade);
    }

    fields
}

fn find_same_line_value(lines: &[&str], aliases: &[&str]) -> Option<String> {
    for line in lines {
        let lower = line.to_lowercase();
        for alias in aliases {
            if let Some(pos) = lower.find(alias) {
                let after_label = &line[pos + alias.len()..];
                let value = after_label.trim_start_matches([':', '/', '-', ' ']).trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

fn non_blank(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn assign(fields: &mut ExtractedFields, field: &str, value: String) {
    match field {
        "student_name" => fields.student_name = Some(value),
        "father_figure_name" => fields.father_figure_name = Some(value),
        "phone" => fields.phone = Some(value),
        "email" => fields.email = Some(value),
        "teacher_name" => fields.teacher_name = Some(value),
        "city_or_location" => fields.city_or_location = Some(value),
        _ => unreachable!("unhandled same-line label field {field:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_same_line_values() {
        let text = "Student's Name: Jordan Altman\nGrade / Grado: 8\nSchool / Escuela: Lincoln Middle\n";
        let fields = extract(text, "My essay body.");
        assert_eq!(fields.student_name.as_deref(), Some("Jordan Altman"));
        assert_eq!(fields.school_name.as_deref(), Some("Lincoln Middle"));
        assert_eq!(fields.grade, Some(Grade::Numeric(8)));
        assert_eq!(fields.essay_text.as_deref(), Some("My essay body."));
    }

    #[test]
    fn spanish_aliases_are_recognized() {
        let text = "Nombre del Estudiante: Maria Lopez\nEscuela: Washington Elementary\n";
        let fields = extract(text, "");
        assert_eq!(fields.student_name.as_deref(), Some("Maria Lopez"));
        assert_eq!(fields.school_name.as_deref(), Some("Washington Elementary"));
        assert_eq!(fields.essay_text, None);
    }

    #[test]
    fn missing_labels_leave_fields_null() {
        let fields = extract("No recognizable labels here.", "");
        assert_eq!(fields.student_name, None);
        assert_eq!(fields.grade, None);
    }

    #[test]
    fn blank_label_value_does_not_produce_empty_string_field() {
        let text = "Student's Name: \nGrade:\n";
        let fields = extract(text, "");
        assert_eq!(fields.student_name, None);
        assert_eq!(fields.grade, None);
    }
}
