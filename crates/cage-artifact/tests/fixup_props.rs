use cage_artifact::{apply_fixups, FixupError, FixupSet, Integrity, RegexCodec, RegexLiteral, StructuredValue};
use proptest::prelude::*;

fn ascii_source() -> impl Strategy<Value = String> {
    "[a-z;(){}.=]{0,64}"
}

fn mixed_source() -> impl Strategy<Value = String> {
    "[a-z;é€ü😀𝄞]{0,32}"
}

/// Code-unit offset and byte index of the character at `index`
fn unit_and_byte(source: &str, index: usize) -> (usize, usize) {
    let units = source.chars().take(index).map(char::len_utf16).sum();
    let byte = source.char_indices().nth(index).map_or(source.len(), |(i, _)| i);
    (units, byte)
}

proptest! {
    #[test]
    fn prop_fixups_preserve_original_text(
        source in ascii_source(),
        raw in prop::collection::btree_map(0usize..=64, "[A-Z]{1,4}", 0..6),
    ) {
        let fixups: FixupSet = raw
            .into_iter()
            .filter(|(offset, _)| *offset <= source.len())
            .collect();
        let patched = apply_fixups(&source, &fixups).unwrap();

        prop_assert_eq!(patched.len(), source.len() + fixups.added_len());

        // Each insertion appears at its offset plus everything inserted before it,
        // and stripping the insertions gives back the source.
        let mut shift = 0;
        let mut stripped = String::new();
        let mut cursor = 0;
        for (offset, text) in fixups.iter() {
            let at = offset + shift;
            prop_assert_eq!(&patched[at..at + text.len()], text);
            stripped.push_str(&patched[cursor..at]);
            cursor = at + text.len();
            shift += text.len();
        }
        stripped.push_str(&patched[cursor..]);
        prop_assert_eq!(stripped, source);
    }

    #[test]
    fn prop_any_offset_past_end_fails(source in ascii_source(), extra in 1usize..100) {
        let offset = source.len() + extra;
        let fixups = FixupSet::new().with(0, "ok").with(offset, "x");
        prop_assert_eq!(
            apply_fixups(&source, &fixups),
            Err(FixupError::OutOfRange { offset, len: source.len() })
        );
    }

    #[test]
    fn prop_integrity_string_round_trips(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let integrity = Integrity::compute(&data);
        let parsed: Integrity = integrity.to_string().parse().unwrap();
        prop_assert_eq!(parsed, integrity);
    }

    #[test]
    fn prop_regex_values_survive_random_markers(
        pattern in "[a-z^$()|.*]{0,12}",
        flags in "[gimsuy]{0,3}",
        plain in "[a-z/ ]{0,12}",
    ) {
        let codec = RegexCodec::with_random_marker();
        let value = StructuredValue::Array(vec![
            StructuredValue::Regex(RegexLiteral::new(pattern, flags)),
            StructuredValue::String(plain),
        ]);
        let decoded = codec.parse(&codec.stringify(&value)).unwrap();
        prop_assert_eq!(decoded, value);
    }

    #[test]
    fn prop_non_ascii_fixup_lands_before_its_character(
        source in mixed_source(),
        pick in any::<prop::sample::Index>(),
        text in "[A-Z]{1,4}",
    ) {
        let index = pick.index(source.chars().count() + 1);
        let (offset, byte) = unit_and_byte(&source, index);
        let patched = apply_fixups(&source, &FixupSet::new().with(offset, text.clone())).unwrap();
        prop_assert_eq!(patched, format!("{}{}{}", &source[..byte], text, &source[byte..]));
    }

    #[test]
    fn prop_non_ascii_range_is_code_units(source in mixed_source(), extra in 1usize..8) {
        let len = source.encode_utf16().count();
        prop_assert!(apply_fixups(&source, &FixupSet::new().with(len, "x")).is_ok());
        prop_assert_eq!(
            apply_fixups(&source, &FixupSet::new().with(len + extra, "x")),
            Err(FixupError::OutOfRange { offset: len + extra, len })
        );
    }
}
