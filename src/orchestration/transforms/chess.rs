use super::{as_number, required, required_str, TransformContext, TransformError};
use serde_json::{json, Map, Value};

const FILES: &[u8; 8] = b"abcdefgh";
const PROMOTIONS: &[char] = &['q', 'r', 'b', 'n'];

fn valid_square(square: &str) -> bool {
    let bytes = square.as_bytes();
    bytes.len() == 2 && FILES.contains(&bytes[0]) && (b'1'..=b'8').contains(&bytes[1])
}

fn square_param<'a>(
    params: &'a Map<String, Value>,
    transform: &'static str,
    param: &'static str,
) -> Result<&'a str, TransformError> {
    let square = required_str(params, transform, param)?;
    if valid_square(square) {
        Ok(square)
    } else {
        Err(TransformError::InvalidParam {
            transform,
            param,
            reason: format!("`{square}` is not a board square"),
        })
    }
}

pub(super) fn uci_parse(
    params: &Map<String, Value>,
    _ctx: &TransformContext,
) -> Result<Value, TransformError> {
    let raw = required_str(params, "uci_parse", "move")?.trim().to_ascii_lowercase();
    let invalid = || TransformError::InvalidParam {
        transform: "uci_parse",
        param: "move",
        reason: format!("`{raw}` is not a UCI move"),
    };
    if !(raw.len() == 4 || raw.len() == 5) || !raw.is_ascii() {
        return Err(invalid());
    }
    let (from, to) = (&raw[0..2], &raw[2..4]);
    if !valid_square(from) || !valid_square(to) {
        return Err(invalid());
    }
    let promotion = match raw[4..].chars().next() {
        Some(piece) if PROMOTIONS.contains(&piece) => Value::String(piece.to_string()),
        Some(_) => return Err(invalid()),
        None => Value::Null,
    };
    Ok(json!({ "from": from, "to": to, "promotion": promotion, "uci": raw }))
}

pub(super) fn uci_build(
    params: &Map<String, Value>,
    _ctx: &TransformContext,
) -> Result<Value, TransformError> {
    let from = square_param(params, "uci_build", "from")?;
    let to = square_param(params, "uci_build", "to")?;
    let promotion = match params.get("promotion") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(piece))
            if piece.len() == 1 && piece.chars().all(|c| PROMOTIONS.contains(&c.to_ascii_lowercase())) =>
        {
            piece.to_ascii_lowercase()
        }
        Some(other) => {
            return Err(TransformError::InvalidParam {
                transform: "uci_build",
                param: "promotion",
                reason: format!("`{other}` is not one of q, r, b, n"),
            })
        }
    };
    Ok(Value::String(format!("{from}{to}{promotion}")))
}

/// Square name for a 0-based `index` (a1 = 0, h8 = 63) or a `file`/`rank`
/// pair. `flip` mirrors the board for black's point of view.
pub(super) fn pos_to_square(
    params: &Map<String, Value>,
    _ctx: &TransformContext,
) -> Result<Value, TransformError> {
    let coordinate = |param: &'static str, max: i64| -> Result<i64, TransformError> {
        let value = required(params, "pos_to_square", param)?;
        as_number(value)
            .map(|number| number as i64)
            .filter(|number| (0..=max).contains(number))
            .ok_or_else(|| TransformError::InvalidParam {
                transform: "pos_to_square",
                param,
                reason: format!("`{value}` is outside 0..={max}"),
            })
    };
    let mut index = if params.contains_key("index") {
        coordinate("index", 63)?
    } else {
        coordinate("rank", 7)? * 8 + coordinate("file", 7)?
    };
    if params.get("flip").and_then(Value::as_bool) == Some(true) {
        index = 63 - index;
    }
    let file = FILES[(index % 8) as usize] as char;
    let rank = index / 8 + 1;
    Ok(Value::String(format!("{file}{rank}")))
}

/// Expands the placement field of a FEN string into 64 squares, a1 first.
fn expand_placement(fen: &str) -> Option<Vec<char>> {
    let placement = fen.split_whitespace().next()?;
    let ranks = placement.split('/').collect::<Vec<_>>();
    if ranks.len() != 8 {
        return None;
    }
    let mut board = vec!['.'; 64];
    for (row, rank) in ranks.iter().enumerate() {
        let rank_index = 7 - row;
        let mut file = 0usize;
        for piece in rank.chars() {
            if let Some(empty) = piece.to_digit(10) {
                file += empty as usize;
            } else {
                if file >= 8 || !"prnbqkPRNBQK".contains(piece) {
                    return None;
                }
                board[rank_index * 8 + file] = piece;
                file += 1;
            }
        }
        if file != 8 {
            return None;
        }
    }
    Some(board)
}

pub(super) fn compare_positions(
    params: &Map<String, Value>,
    _ctx: &TransformContext,
) -> Result<Value, TransformError> {
    let board = |param: &'static str| -> Result<Vec<char>, TransformError> {
        let fen = required_str(params, "compare_positions", param)?;
        expand_placement(fen).ok_or_else(|| TransformError::InvalidParam {
            transform: "compare_positions",
            param,
            reason: "expected a FEN piece placement".to_string(),
        })
    };
    let (a, b) = (board("a")?, board("b")?);
    let changed = (0..64)
        .filter(|index| a[*index] != b[*index])
        .map(|index| format!("{}{}", FILES[index % 8] as char, index / 8 + 1))
        .collect::<Vec<_>>();
    Ok(json!({
        "equal": changed.is_empty(),
        "count": changed.len(),
        "changed": changed,
    }))
}
