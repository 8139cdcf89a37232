//! Benchmark utilities.

use rowmirror_model::Record;
use rowmirror_protocol::Job;
use rowmirror_testkit::{key, registry, SourceDb};

/// Creates one slugged row, then `rows` related rows each with a test row
/// pointing at it. Returns the test rows.
fn seed(db: &SourceDb, rows: usize) -> Vec<Record> {
    let slugged = db
        .create(
            Record::new(key("relatedmodelwithslug"))
                .with("slug_field", "slug")
                .with("char_field", "c"),
        )
        .unwrap();

    (0..rows)
        .map(|i| {
            let related = db
                .create(Record::new(key("relatedmodel")).with("char_field", format!("related-{i}")))
                .unwrap();
            db.create(
                Record::new(key("testmodel"))
                    .with("char_field", format!("row-{i}"))
                    .with("int_field", i as i64)
                    .with("datetime_field", "2024-01-01T00:00:00Z")
                    .with("fk_field", related.pk.unwrap())
                    .with("fk_slug_field", slugged.pk.unwrap()),
            )
            .unwrap()
        })
        .collect()
}

/// A seeded source with an empty capture queue, plus its test rows.
pub fn seeded_source(rows: usize) -> (SourceDb, Vec<Record>) {
    let db = SourceDb::new(registry());
    let records = seed(&db, rows);
    db.drain_jobs();
    (db, records)
}

/// The jobs captured while seeding `rows` test rows, in capture order.
pub fn captured_jobs(rows: usize) -> Vec<Job> {
    let db = SourceDb::new(registry());
    seed(&db, rows);
    db.drain_jobs()
}
