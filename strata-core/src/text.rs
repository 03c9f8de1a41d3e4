// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Char-boundary-safe truncation

use std::borrow::Cow;

/// Marker appended to truncated text
pub const ELLIPSIS: &str = "…";

/// Keep at most `max_chars` chars of `s`, appending [`ELLIPSIS`] when cut
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        None => Cow::Borrowed(s),
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + ELLIPSIS.len());
            out.push_str(&s[..byte_idx]);
            out.push_str(ELLIPSIS);
            Cow::Owned(out)
        }
    }
}

/// Char count (not byte length)
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_untouched() {
        assert!(matches!(truncate_chars("abc", 3), Cow::Borrowed("abc")));
    }

    #[test]
    fn test_truncation_appends_marker() {
        let long = "x".repeat(15_000);
        let cut = truncate_chars(&long, 12_000);
        assert_eq!(char_len(&cut), 12_001);
        assert!(cut.ends_with(ELLIPSIS));
    }

    #[test]
    fn test_multibyte_boundary() {
        let s = "héllo wörld";
        let cut = truncate_chars(s, 2);
        assert_eq!(cut, "hé…");
    }
}
