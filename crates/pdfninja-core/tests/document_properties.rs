//! End-to-end properties of the engine, exercised through bytes.
//!
//! Run with: cargo test -p pdfninja-core --test document_properties

mod common;

use common::*;
use lopdf::Object;
use pdfninja_core::{
    all_pages, delete_pages, execute, extract, merge, parse, parse_range, serialize,
    add_watermark, EngineLimits, ExtractMode, Extracted, NamedFile, Output, PageSelection,
    PdfCommand, PdfNinjaError, Progress, ProgressEvent, SelectionSpec, SerializeOptions, Stage,
    ValidationError, WatermarkSpec,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

// ============================================================================
// Round-trip
// ============================================================================

#[test]
fn test_round_trip_keeps_pages_and_references() {
    let doc = parse(&create_synthetic_pdf(6, "Trip")).unwrap();
    let bytes = serialize(&doc, &SerializeOptions::default(), &mut Progress::silent()).unwrap();
    let again = parse(&bytes).unwrap();

    let before = doc.page_index().unwrap();
    let after = again.page_index().unwrap();
    assert_eq!(before.ids(), after.ids());
    for (a, b) in before.iter().zip(after.iter()) {
        assert_eq!(a.content_ids, b.content_ids);
        let font = |doc: &pdfninja_core::PdfDocument, page: &pdfninja_core::PageEntry| {
            let resources = page.inherited.get(b"Resources").unwrap().clone();
            let resources = doc.resolve(&resources).unwrap().as_dict().unwrap().clone();
            let fonts = resources.get(b"Font").unwrap().clone();
            let fonts = doc.resolve(&fonts).unwrap().as_dict().unwrap().clone();
            fonts.get(b"F1").unwrap().as_reference().unwrap()
        };
        assert_eq!(font(&doc, a), font(&again, b));
    }
    assert_eq!(page_contents(&doc), page_contents(&again));
}

#[test]
fn test_round_trip_with_classic_xref() {
    let doc = parse(&create_synthetic_pdf(3, "Classic")).unwrap();
    let options = SerializeOptions {
        object_streams: false,
        compress_streams: false,
    };
    let bytes = serialize(&doc, &options, &mut Progress::silent()).unwrap();
    assert!(bytes.windows(4).any(|w| w == b"xref"));
    assert_eq!(parse(&bytes).unwrap().page_count().unwrap(), 3);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn proptest_round_trip_page_order(pages in 1u32..12) {
        let doc = parse(&create_synthetic_pdf(pages, "Prop")).unwrap();
        let bytes = serialize(&doc, &SerializeOptions::default(), &mut Progress::silent()).unwrap();
        let contents = contents_of(&bytes);
        prop_assert_eq!(contents.len(), pages as usize);
        for (i, content) in contents.iter().enumerate() {
            prop_assert!(shows_label(content, "Prop", i as u32 + 1));
        }
    }
}

// ============================================================================
// Range parsing
// ============================================================================

#[test]
fn test_range_parsing_examples() {
    assert_eq!(parse_range("1-3,5", 10).pages(), &[1, 2, 3, 5]);
    assert_eq!(parse_range("2-2", 10).pages(), &[2]);
    assert!(parse_range("", 10).is_empty());
    assert!(parse_range("99", 10).is_empty());
    assert!(parse_range("3-1", 10).is_empty());
}

// ============================================================================
// Structural edits
// ============================================================================

#[test]
fn test_delete_invariants() {
    let doc = parse(&create_synthetic_pdf(4, "Inv")).unwrap();
    let err = delete_pages(&doc, &all_pages(4), &mut Progress::silent()).unwrap_err();
    assert!(matches!(
        err,
        PdfNinjaError::Validation(ValidationError::WouldEmptyDocument { .. })
    ));

    let same = delete_pages(&doc, &PageSelection::default(), &mut Progress::silent()).unwrap();
    assert_eq!(same.page_count().unwrap(), 4);
}

#[test]
fn test_extract_then_merge_reproduces_pages() {
    let doc = parse(&create_synthetic_pdf(5, "Inverse")).unwrap();
    let Extracted::Separate(parts) =
        extract(&doc, &all_pages(5), ExtractMode::Separate, &mut Progress::silent()).unwrap()
    else {
        panic!("expected separate outputs");
    };

    // Through bytes, the way a user would download and re-upload them.
    let reparsed: Vec<_> = parts
        .iter()
        .map(|(_, part)| {
            let bytes = serialize(part, &SerializeOptions::default(), &mut Progress::silent()).unwrap();
            parse(&bytes).unwrap()
        })
        .collect();
    let merged = merge(&reparsed, &mut Progress::silent()).unwrap();

    assert_eq!(merged.page_count().unwrap(), 5);
    assert_eq!(page_contents(&merged), page_contents(&doc));
}

#[test]
fn test_inherited_attributes_survive_extract_and_merge() {
    let bytes = create_inherited_pdf(4, "Rot");
    let doc = parse(&bytes).unwrap();
    let original = doc.page_index().unwrap();
    assert_eq!(original.get(1).unwrap().content_ids.len(), 2);

    let extracted = execute(
        PdfCommand::Extract {
            file: NamedFile::new("rot.pdf", bytes.clone()),
            selection: SelectionSpec::Range("2-3".into()),
            mode: ExtractMode::Single,
        },
        &EngineLimits::default(),
        &mut Progress::silent(),
    )
    .unwrap();
    let Output::Single(part) = extracted.output else {
        panic!("expected one output file");
    };
    let merged = execute(
        PdfCommand::Merge {
            files: vec![part.clone(), NamedFile::new("rot.pdf", bytes)],
        },
        &EngineLimits::default(),
        &mut Progress::silent(),
    )
    .unwrap();
    let Output::Single(merged) = merged.output else {
        panic!("expected one output file");
    };

    let crop = original.get(1).unwrap().inherited.get(b"CropBox").unwrap().clone();
    for (bytes, labels) in [(&part.data, vec![2u32, 3]), (&merged.data, vec![2, 3, 1, 2, 3, 4])] {
        let out = parse(bytes).unwrap();
        let index = out.page_index().unwrap();
        assert_eq!(index.len(), labels.len());
        let contents = page_contents(&out);
        for (page, n) in index.iter().zip(&labels) {
            assert_eq!(page.rotation, 90);
            assert_eq!(page.media_box, original.get(1).unwrap().media_box);
            assert_eq!(page.inherited.get(b"CropBox").unwrap(), &crop);
            assert_eq!(page.content_ids.len(), 2);
            assert!(shows_label(&contents[page.number as usize - 1], "Rot", *n));
        }
    }
}

#[test]
fn test_ten_page_delete_scenario() {
    let result = execute(
        PdfCommand::Delete {
            file: NamedFile::new("ten.pdf", create_synthetic_pdf(10, "Ten")),
            selection: SelectionSpec::Range("2,4,6,8,10".into()),
        },
        &EngineLimits::default(),
        &mut Progress::silent(),
    )
    .unwrap();
    let Output::Single(file) = &result.output else {
        panic!("expected one output file");
    };
    assert_eq!(file.name, "ten_edited.pdf");

    let original = contents_of(&create_synthetic_pdf(10, "Ten"));
    let contents = contents_of(&file.data);
    assert_eq!(contents.len(), 5);
    for (content, n) in contents.iter().zip([1u32, 3, 5, 7, 9]) {
        assert_eq!(content, &original[n as usize - 1]);
    }
}

// ============================================================================
// Overlays
// ============================================================================

#[test]
fn test_watermark_is_additive() {
    let doc = parse(&create_synthetic_pdf(3, "Mark")).unwrap();
    let before = doc.page_index().unwrap();
    let before_contents = page_contents(&doc);

    let (marked, _) = add_watermark(&doc, &WatermarkSpec::text("DRAFT"), &mut Progress::silent()).unwrap();
    let bytes = serialize(&marked, &SerializeOptions::default(), &mut Progress::silent()).unwrap();
    let reparsed = parse(&bytes).unwrap();
    let after = reparsed.page_index().unwrap();

    assert_eq!(after.len(), before.len());
    for (a, b) in before.iter().zip(after.iter()) {
        assert_eq!(a.media_box, b.media_box);
    }
    for (old, new) in before_contents.iter().zip(page_contents(&reparsed)) {
        assert!(new.len() >= old.len());
        assert!(String::from_utf8_lossy(&new).contains("(DRAFT) Tj"));
    }
}

#[test]
fn test_signature_falls_back_to_text() {
    let result = execute(
        PdfCommand::Sign {
            file: NamedFile::new("contract.pdf", create_synthetic_pdf(2, "Sign")),
            signature: pdfninja_core::SignatureSpec::new("data:image/png;base64,AAAA"),
        },
        &EngineLimits::default(),
        &mut Progress::silent(),
    )
    .unwrap();
    assert_eq!(result.warnings.len(), 1);
    let Output::Single(file) = &result.output else {
        panic!("expected one output file");
    };
    let first = &contents_of(&file.data)[0];
    assert!(String::from_utf8_lossy(first).contains("Signature: "));
}

// ============================================================================
// Progress
// ============================================================================

fn events_for(command: PdfCommand) -> (bool, Vec<ProgressEvent>) {
    let mut events = Vec::new();
    let ok = {
        let mut callback = |stage, percentage| events.push(ProgressEvent { stage, percentage });
        let mut progress = Progress::new(&mut callback);
        execute(command, &EngineLimits::default(), &mut progress).is_ok()
    };
    (ok, events)
}

fn assert_non_decreasing(events: &[ProgressEvent]) {
    for pair in events.windows(2) {
        assert!(
            pair[0].percentage <= pair[1].percentage,
            "progress went backwards: {:?}",
            events
        );
    }
}

#[test]
fn test_progress_is_monotonic_for_every_command() {
    let file = || NamedFile::new("p.pdf", create_synthetic_pdf(4, "Prog"));
    let commands = vec![
        PdfCommand::Compress {
            file: file(),
            profile: pdfninja_core::CompressionProfile::Heavy,
        },
        PdfCommand::Extract {
            file: file(),
            selection: SelectionSpec::Range("1-3".into()),
            mode: ExtractMode::Separate,
        },
        PdfCommand::Merge {
            files: vec![file(), file()],
        },
        PdfCommand::Watermark {
            file: file(),
            watermark: WatermarkSpec::default(),
        },
        PdfCommand::LabelProtected {
            file: file(),
            label: "internal".into(),
        },
        PdfCommand::Delete {
            file: file(),
            selection: SelectionSpec::Pages(vec![2, 4]),
        },
        PdfCommand::Sign {
            file: file(),
            signature: pdfninja_core::SignatureSpec::new("J. Doe"),
        },
        PdfCommand::MakeReadOnly { file: file() },
        PdfCommand::Unlock {
            file: file(),
            password: String::new(),
        },
    ];
    for command in commands {
        let name = command.name();
        let (ok, events) = events_for(command);
        assert!(ok, "{} failed", name);
        assert_non_decreasing(&events);
        let last = events.last().unwrap();
        assert_eq!((last.stage, last.percentage), (Stage::Complete, 100), "{}", name);
        assert_eq!(
            events.iter().filter(|e| e.stage == Stage::Complete).count(),
            1
        );
    }
}

#[test]
fn test_progress_holds_on_failure() {
    let (ok, events) = events_for(PdfCommand::Compress {
        file: NamedFile::new("broken.pdf", b"%PDF-1.7\n this is not really a document at all, just text".to_vec()),
        profile: Default::default(),
    });
    assert!(!ok);
    assert_non_decreasing(&events);
    let last = events.last().unwrap();
    assert_eq!(last.stage, Stage::Error);
    assert_eq!(last.percentage, events[events.len() - 2].percentage);
}

#[test]
fn test_every_nth_selection_through_command() {
    let result = execute(
        PdfCommand::Extract {
            file: NamedFile::new("n.pdf", create_synthetic_pdf(9, "Nth")),
            selection: SelectionSpec::EveryNth { every_nth: 3 },
            mode: ExtractMode::Single,
        },
        &EngineLimits::default(),
        &mut Progress::silent(),
    )
    .unwrap();
    let Output::Single(file) = &result.output else {
        panic!("expected one output file");
    };
    let contents = contents_of(&file.data);
    assert_eq!(contents.len(), 3);
    for (content, n) in contents.iter().zip([3, 6, 9]) {
        assert!(shows_label(content, "Nth", n));
    }
    let doc = parse(&file.data).unwrap();
    let info = doc.info_dictionary().unwrap();
    assert!(matches!(info.get(b"Producer"), Ok(Object::String(..))));
}
