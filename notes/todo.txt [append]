- one more
### END FILE: notes/todo.txt ###

### FILE: trailing.rs ###
fn cut_off() {
";

fn parse_chunked(text: &str, cuts: &[usize]) -> Vec<ParsedFileEdit> {
    let mut bounds: Vec<usize> = cuts
        .iter()
        .map(|c| c % (text.len() + 1))
        .filter(|c| text.is_char_boundary(*c))
        .collect();
    bounds.sort_unstable();
    bounds.dedup();

    let mut parser = ResponseParser::new();
    let mut out = Vec::new();
    let mut prev = 0;
    for b in bounds {
        out.extend(parser.feed(&text[prev..b]));
        prev = b;
    }
    out.extend(parser.feed(&text[prev..]));
    out.extend(parser.finish());
    out
}

#[test]
fn whole_response_parses_into_four_edits() {
    let edits = parse_response(RESPONSE, None).into_vec();
    let paths: Vec<&str> = edits.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, ["src/app.py", "README.md", "notes/todo.txt", "trailing.rs"]);

    assert_eq!(edits[0].kind, EditKind::MidFileSplice { start_line: 2, end_line: 4 });
    assert_eq!(edits[0].new_content.len(), 2);
    assert_eq!(edits[1].kind, EditKind::FullReplace);
    assert_eq!(edits[2].kind, EditKind::Append);
    assert_eq!(edits[3].status, BlockStatus::Incomplete);
}

#[test]
fn later_block_for_same_path_wins() {
    let text = "\
### FILE: a.txt ###
first
### END FILE ###
### FILE: b.txt ###
b
### END FILE ###
### FILE: a.txt ###
second
### END FILE ###
";
    let edits = parse_response(text, None).into_vec();
    assert_eq!(edits.len(), 2);
    assert_eq!(edits[0].path, "a.txt");
    assert_eq!(edits[0].new_content, vec!["second".to_string()]);
    assert_eq!(edits[1].path, "b.txt");
}

#[test]
fn markdown_end_heading_stays_in_the_body() {
    let text = "\
### FILE: NOTES.md ###
# Notes
intro
## End of file
appendix that matters
### END FILE: NOTES.md ###
";
    let edits = parse_response(text, None).into_vec();
    assert_eq!(edits.len(), 1);
    assert!(edits[0].is_clean());
    assert_eq!(
        edits[0].new_content,
        ["# Notes", "intro", "## End of file", "appendix that matters"]
    );
}

#[test]
fn n_blocks_give_n_edits_in_order() {
    let mut text = String::new();
    for i in 0..25 {
        text.push_str(&format!("### FILE: f{i}.txt ###\nvalue {i}\n### END FILE ###\n\n"));
    }
    let edits = parse_response(&text, None).into_vec();
    assert_eq!(edits.len(), 25);
    for (i, e) in edits.iter().enumerate() {
        assert_eq!(e.path, format!("f{i}.txt"));
        assert!(e.is_clean());
    }
}

#[test]
fn single_character_chunks_match_whole_parse() {
    let whole = parse_response(RESPONSE, None).into_vec();
    let cuts: Vec<usize> = (0..=RESPONSE.len()).collect();
    assert_eq!(parse_chunked(RESPONSE, &cuts), whole);
}

proptest! {
    #[test]
    fn arbitrary_chunking_is_invisible(cuts in proptest::collection::vec(any::<usize>(), 0..40)) {
        let whole = parse_response(RESPONSE, None).into_vec();
        prop_assert_eq!(parse_chunked(RESPONSE, &cuts), whole);
    }

    #[test]
    fn crlf_stream_matches_lf_stream(cuts in proptest::collection::vec(any::<usize>(), 0..20)) {
        let crlf = RESPONSE.replace('\n', "\r\n");
        let whole = parse_response(RESPONSE, None).into_vec();
        prop_assert_eq!(parse_chunked(&crlf, &cuts), whole);
    }
}
