use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sessionforge::framer::{Framer, TerminatorFramer};
use sessionforge::SendQueue;

fn bench_send_queue_enqueue(c: &mut Criterion) {
    c.bench_function("send_queue_enqueue_dequeue", |b| {
        let queue = SendQueue::new(64);
        let segment = Bytes::from_static(b"hello, world");
        b.iter(|| {
            queue.enqueue(segment.clone());
            let mut out = Vec::new();
            black_box(queue.try_dequeue(&mut out));
        });
    });
}

fn bench_terminator_framer_decode(c: &mut Criterion) {
    c.bench_function("terminator_framer_decode_pipelined", |b| {
        b.iter_batched(
            || {
                let mut buf = BytesMut::new();
                for _ in 0..64 {
                    buf.extend_from_slice(b"ECHO hello world\r\n");
                }
                buf
            },
            |mut buf| {
                let mut framer = TerminatorFramer::crlf();
                let mut count = 0;
                while let Ok(Some(_decoded)) = framer.decode(&mut buf) {
                    count += 1;
                }
                black_box(count)
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_send_queue_enqueue, bench_terminator_framer_decode);
criterion_main!(benches);
