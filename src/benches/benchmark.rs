#[path = "../tests/synthetic.rs"]
mod synthetic;

use criterion::{Criterion, criterion_group, criterion_main};
use evtx_json::{EvtxParser, ParserSettings};
use synthetic::*;

fn sample() -> Vec<u8> {
    let template = TemplateBuilder::event_with_data(&["Image", "CommandLine", "User"]);

    let mut file = EvtxFileBuilder::new();
    for chunk_number in 0..8_u64 {
        let first_id = chunk_number * 100 + 1;
        let mut chunk = ChunkBuilder::new(first_id);
        for id in first_id..first_id + 100 {
            chunk = chunk.record(RecordBuilder::new(id).instance(
                &template,
                vec![
                    "C:\\Windows\\System32\\cmd.exe".into(),
                    id.to_string().as_str().into(),
                    "NT AUTHORITY\\SYSTEM".into(),
                ],
            ));
        }
        file = file.chunk(chunk);
    }
    file.build()
}

fn process_records(buffer: &[u8], num_threads: usize) {
    let mut parser = EvtxParser::from_buffer(buffer.to_vec())
        .unwrap()
        .with_configuration(ParserSettings::new().num_threads(num_threads));

    for (i, record) in parser.records().enumerate() {
        match record {
            Ok(r) => {
                assert_eq!(r.event_record_id, i as u64 + 1);
            }
            Err(e) => println!("Error while reading record {}, {:?}", i, e),
        }
    }
}

fn process_records_to_json(buffer: &[u8]) {
    let mut parser = EvtxParser::from_buffer(buffer.to_vec()).unwrap();

    for record in parser.records().flatten() {
        criterion::black_box(record.to_json(false).unwrap());
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    let evtx_file = sample();

    c.bench_function("read 800 records", |b| {
        b.iter(|| process_records(&evtx_file, 1))
    });
    c.bench_function("read 800 records (threaded)", |b| {
        b.iter(|| process_records(&evtx_file, 0))
    });
    c.bench_function("read 800 records to json", |b| {
        b.iter(|| process_records_to_json(&evtx_file))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
