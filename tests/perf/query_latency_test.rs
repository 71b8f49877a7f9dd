use std::time::Instant;

use crate::tag::Tag;
use crate::tag_finder::{TagFinder, TagLookup};
use crate::tag_search::TagSearch;
use crate::tag_store::{insert_tag, open_memory};

fn p95_ms(samples: &mut [f64]) -> f64 {
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let last = samples.len().saturating_sub(1);
    let idx = ((last as f64) * 0.95).round() as usize;
    samples[idx.min(last)]
}

#[test]
fn warm_near_match_p95_under_25ms() {
    let conn = open_memory().unwrap();
    conn.execute_batch("BEGIN").unwrap();
    for i in 0..10_000 {
        let tag = Tag::class("\\App\\Generated", &format!("Generated{i:05}"))
            .with_signature(&format!("class Generated{i:05}"));
        insert_tag(&conn, &tag).unwrap();
    }
    insert_tag(&conn, &Tag::class("\\App", "UserRepository")).unwrap();
    conn.execute_batch("COMMIT").unwrap();

    let finder = TagFinder::new(&conn);
    let search = TagSearch::parse("Generated04");

    for _ in 0..30 {
        let _ = finder.near_match_class_or_file(&search);
    }

    let mut batch_p95 = Vec::with_capacity(5);
    for _ in 0..5 {
        let mut samples = Vec::with_capacity(80);
        for _ in 0..80 {
            let start = Instant::now();
            let tags = finder.near_match_class_or_file(&search);
            samples.push(start.elapsed().as_secs_f64() * 1000.0);
            assert_eq!(tags.len(), 100);
        }
        batch_p95.push(p95_ms(&mut samples));
    }

    batch_p95.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median_p95 = batch_p95[batch_p95.len() / 2];

    assert!(
        median_p95 <= 25.0,
        "median batch p95 too high: {median_p95:.3}ms (budget 25.0ms); batches={batch_p95:?}",
    );
}
