//! Decoding model replies into grid cells
//!
//! Models are asked for `{"coordinates":[{"box_2d":[row, col]}]}` but
//! replies drift: fenced blocks, prose around the JSON, a flat `tiles`
//! list, or bare `[row, col]` pairs. All of these are accepted; anything
//! pointing outside the grid is rejected as malformed.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn fenced_json() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid regex"))
}

fn coordinate_pair() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\s*(\d+)\s*,\s*(\d+)\s*\]").expect("valid regex"))
}

/// Decode a reply into sorted, distinct, zero-indexed cells
pub fn decode_tiles(text: &str, rows: u32, columns: u32) -> Result<Vec<u32>, String> {
    let mut tiles = match extract_json(text) {
        Some(value) => tiles_from_json(&value, rows, columns)?,
        None => tiles_from_pairs(text, rows, columns)?,
    };

    tiles.sort_unstable();
    tiles.dedup();
    Ok(tiles)
}

/// Locate a JSON object: fenced block, whole reply, then outermost braces
fn extract_json(text: &str) -> Option<Value> {
    for caps in fenced_json().captures_iter(text) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str(&caps[1]) {
            return Some(value);
        }
    }

    if let Ok(value @ Value::Object(_)) = serde_json::from_str(text.trim()) {
        return Some(value);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&text[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn tiles_from_json(value: &Value, rows: u32, columns: u32) -> Result<Vec<u32>, String> {
    if let Some(tiles) = value.get("tiles").and_then(Value::as_array) {
        let cells = rows * columns;
        return tiles
            .iter()
            .map(|tile| {
                let index = tile
                    .as_u64()
                    .ok_or_else(|| format!("tile {tile} is not a non-negative integer"))?;
                if index >= cells as u64 {
                    return Err(format!("tile {index} is outside the {rows}x{columns} grid"));
                }
                Ok(index as u32)
            })
            .collect();
    }

    let Some(coordinates) = value.get("coordinates").and_then(Value::as_array) else {
        return Err("reply has neither 'tiles' nor 'coordinates'".to_string());
    };

    coordinates
        .iter()
        .map(|entry| {
            // Either {"box_2d": [r, c]} or a bare [r, c]
            let pair = entry.get("box_2d").unwrap_or(entry);
            let (row, col) = match pair.as_array().map(Vec::as_slice) {
                Some([row, col]) => (row.as_u64(), col.as_u64()),
                _ => (None, None),
            };
            match (row, col) {
                (Some(row), Some(col)) => cell_index(row, col, rows, columns),
                _ => Err(format!("coordinate {entry} is not a [row, col] pair")),
            }
        })
        .collect()
}

fn tiles_from_pairs(text: &str, rows: u32, columns: u32) -> Result<Vec<u32>, String> {
    let mut tiles = Vec::new();
    for caps in coordinate_pair().captures_iter(text) {
        let row: u64 = caps[1].parse().map_err(|_| format!("bad row '{}'", &caps[1]))?;
        let col: u64 = caps[2].parse().map_err(|_| format!("bad column '{}'", &caps[2]))?;
        tiles.push(cell_index(row, col, rows, columns)?);
    }

    if tiles.is_empty() {
        let preview: String = text.chars().take(120).collect();
        return Err(format!("no tile selection found in reply: {preview}"));
    }
    Ok(tiles)
}

fn cell_index(row: u64, col: u64, rows: u32, columns: u32) -> Result<u32, String> {
    if row >= rows as u64 || col >= columns as u64 {
        return Err(format!("[{row}, {col}] is outside the {rows}x{columns} grid"));
    }
    Ok(row as u32 * columns + col as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_coordinates() {
        let reply = r#"Here is my answer:
```json
{"challenge_prompt": "select all vehicles", "coordinates": [{"box_2d": [2, 1]}, {"box_2d": [0, 0]}]}
```"#;
        assert_eq!(decode_tiles(reply, 3, 3).unwrap(), vec![0, 7]);
    }

    #[test]
    fn test_flat_tiles_sorted_and_deduplicated() {
        let reply = r#"{"tiles": [8, 2, 2, 5]}"#;
        assert_eq!(decode_tiles(reply, 3, 3).unwrap(), vec![2, 5, 8]);
    }

    #[test]
    fn test_json_embedded_in_prose() {
        let reply = r#"I think the answer is {"coordinates": [[1, 2]]} based on the images."#;
        assert_eq!(decode_tiles(reply, 3, 3).unwrap(), vec![5]);
    }

    #[test]
    fn test_empty_selection_is_valid() {
        assert!(decode_tiles(r#"{"coordinates": []}"#, 3, 3).unwrap().is_empty());
    }

    #[test]
    fn test_pairs_in_free_text() {
        let reply = "Matching tiles: [0, 1] and [1,1]";
        assert_eq!(decode_tiles(reply, 3, 3).unwrap(), vec![1, 4]);
    }

    #[test]
    fn test_non_square_grid() {
        let reply = r#"{"coordinates": [{"box_2d": [1, 3]}]}"#;
        assert_eq!(decode_tiles(reply, 2, 4).unwrap(), vec![7]);
    }

    #[test]
    fn test_out_of_grid_is_malformed() {
        assert!(decode_tiles(r#"{"tiles": [9]}"#, 3, 3).is_err());
        assert!(decode_tiles(r#"{"coordinates": [{"box_2d": [3, 0]}]}"#, 3, 3).is_err());
        assert!(decode_tiles("[0, 5]", 3, 3).is_err());
    }

    #[test]
    fn test_unparseable_reply() {
        assert!(decode_tiles("I cannot help with that.", 3, 3).is_err());
        assert!(decode_tiles(r#"{"answer": "yes"}"#, 3, 3).is_err());
    }
}
