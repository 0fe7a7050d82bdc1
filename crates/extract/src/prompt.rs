pub fn build_extraction_prompt(chunk_text: &str, language: &str, entity_types: &[String]) -> String {
    let types = if entity_types.is_empty() {
        "PERSON, ORGANIZATION, GEO, EVENT, CATEGORY".to_string()
    } else {
        entity_types.join(", ")
    };

    format!(
        r#"Extract entities and relationships from the following text.

INSTRUCTIONS:
1. Identify every entity of the listed types
2. Extract relationships between pairs of entities you identified
3. Write names and descriptions in {language}
4. Output ONLY valid JSON, nothing else

SCHEMA:
{{
  "entities": [
    {{"name": "Entity Name", "type": "one of the types below", "description": "what the text says about it"}}
  ],
  "relations": [
    {{"source": "Entity Name", "target": "Other Entity Name", "description": "how they are related", "weight": 1.0}}
  ]
}}

RULES:
- Entity types: {types}
- Relation source and target must be entity names from the "entities" list
- Weight is a number from 1 to 10 for the strength of the relationship
- Every entity and relation needs a description
- Output ONLY the JSON object, no markdown, no explanations

TEXT:
{chunk_text}

JSON OUTPUT:"#
    )
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        invalid_json
    )
}
