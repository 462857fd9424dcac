use std::io::SeekFrom;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use hoard::http::body::EntityBody;
use hoard::http::dispatch::{Dispatcher, Notification, Pattern, Reply, Signal};
use hoard::http::entity::EntitySize;
use hoard::http::error::HttpError;

const WIKI: &[u8] = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";

fn chunked_body(bus: &Dispatcher) -> EntityBody {
    EntityBody::streaming(Box::new(WIKI), EntitySize::Chunked, bus.clone())
}

#[tokio::test]
async fn test_reads_buffer_lazily() {
    let bus = Dispatcher::new();
    let body = chunked_body(&bus);

    assert!(!body.buffering_started());
    assert_eq!(&body.read(Some(3)).await.unwrap()[..], b"Wik");
    assert!(body.buffering_started());
    assert_eq!(body.buffered_len().await, 4);
    assert!(!body.is_materialized());

    assert_eq!(&body.read(None).await.unwrap()[..], b"ipedia");
    assert!(body.is_materialized());
    assert_eq!(body.tell().await.unwrap(), 9);
    assert!(body.read(Some(10)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_notifications_carry_raw_bytes() {
    let bus = Dispatcher::new();
    let body = chunked_body(&bus);
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();

    let _sub = bus.connect(
        Pattern::Any,
        Pattern::Only(body.sender_id()),
        move |n: &Notification| {
            sink.lock().unwrap().push((n.signal, n.info.clone()));
            Ok(Reply::Continue)
        },
    );
    body.buffer_all().await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            (Signal::RawData, Bytes::from_static(b"4\r\nWiki\r\n")),
            (Signal::RawData, Bytes::from_static(b"5\r\npedia\r\n")),
            (Signal::RawData, Bytes::from_static(b"0\r\n\r\n")),
            (Signal::EndData, Bytes::new()),
        ]
    );
}

#[tokio::test]
async fn test_buffer_chunk_pulls_one_chunk() {
    let bus = Dispatcher::new();
    let body = chunked_body(&bus);

    let chunk = body.buffer_chunk().await.unwrap();
    assert_eq!(&chunk.data[..], b"Wiki");
    assert_eq!(body.buffered_len().await, 4);

    body.buffer_to(5).await.unwrap();
    assert_eq!(body.buffered_len().await, 9);
    assert!(!body.is_materialized());

    body.buffer_all().await.unwrap();
    assert!(body.is_materialized());
    assert!(body.buffer_chunk().await.unwrap().is_terminal());
}

#[tokio::test]
async fn test_abort_reply_stops_buffering() {
    let bus = Dispatcher::new();
    let body = chunked_body(&bus);
    let _veto = bus.connect(
        Pattern::Only(Signal::RawData),
        Pattern::Only(body.sender_id()),
        |_: &Notification| Ok(Reply::Abort),
    );

    assert!(matches!(
        body.read(None).await,
        Err(HttpError::BufferingAbort { replies: 1 })
    ));
}

#[tokio::test]
async fn test_other_senders_do_not_trigger_receiver() {
    let bus = Dispatcher::new();
    let body = chunked_body(&bus);
    let other = chunked_body(&bus);
    let _veto = bus.connect(
        Pattern::Any,
        Pattern::Only(other.sender_id()),
        |_: &Notification| Ok(Reply::Abort),
    );

    assert_eq!(&body.contents().await.unwrap()[..], b"Wikipedia");
}

#[tokio::test]
async fn test_seek_from_end_buffers_everything() {
    let bus = Dispatcher::new();
    let body = chunked_body(&bus);

    assert_eq!(body.seek(SeekFrom::End(-2)).await.unwrap(), 7);
    assert!(body.is_materialized());
    assert_eq!(&body.read(None).await.unwrap()[..], b"ia");
}

#[tokio::test]
async fn test_seek_forward_buffers_incrementally() {
    let bus = Dispatcher::new();
    let body = chunked_body(&bus);

    assert_eq!(body.seek(SeekFrom::Start(2)).await.unwrap(), 2);
    assert_eq!(body.buffered_len().await, 4);

    assert_eq!(body.seek(SeekFrom::Current(4)).await.unwrap(), 6);
    assert_eq!(body.buffered_len().await, 9);
    assert_eq!(&body.read(Some(2)).await.unwrap()[..], b"di");
}

#[tokio::test]
async fn test_negative_seek_is_rejected() {
    let body = EntityBody::from_bytes(&b"abc"[..]);

    assert!(matches!(
        body.seek(SeekFrom::Current(-1)).await,
        Err(HttpError::Io(_))
    ));
}

#[tokio::test]
async fn test_write_overwrites_then_extends() {
    let bus = Dispatcher::new();
    let body = chunked_body(&bus);

    body.seek(SeekFrom::Start(4)).await.unwrap();
    body.write(b"PEDIA!!").await.unwrap();

    assert!(body.is_materialized());
    assert_eq!(body.tell().await.unwrap(), 11);
    assert_eq!(&body.contents().await.unwrap()[..], b"WikiPEDIA!!");
}

#[tokio::test]
async fn test_write_past_end_is_rejected() {
    let body = EntityBody::from_bytes(&b"abc"[..]);

    assert_eq!(body.seek(SeekFrom::Start(u64::MAX)).await.unwrap(), u64::MAX);
    assert!(matches!(body.write(b"x").await, Err(HttpError::Io(_))));

    body.seek(SeekFrom::Start(4)).await.unwrap();
    assert!(matches!(body.write(b"x").await, Err(HttpError::Io(_))));
    assert_eq!(&body.contents().await.unwrap()[..], b"abc");

    body.seek(SeekFrom::End(0)).await.unwrap();
    body.write(b"d").await.unwrap();
    assert_eq!(&body.contents().await.unwrap()[..], b"abcd");
}

#[tokio::test]
async fn test_in_memory_body_is_materialized() {
    let body = EntityBody::from_bytes(&b"hello"[..]);

    assert!(body.is_materialized());
    assert_eq!(body.framing().await, Some(EntitySize::Length(5)));
    assert_eq!(&body.read(Some(2)).await.unwrap()[..], b"he");
    assert_eq!(&body.contents().await.unwrap()[..], b"hello");
    assert_eq!(body.tell().await.unwrap(), 2);
}

#[tokio::test]
async fn test_reframe_only_before_buffering() {
    let bus = Dispatcher::new();
    let body = EntityBody::streaming(Box::new(&b"abcdef"[..]), EntitySize::UntilClose, bus);

    assert!(body.reframe(EntitySize::Length(3)).await.unwrap());
    assert_eq!(body.framing().await, Some(EntitySize::Length(3)));
    assert_eq!(&body.read(Some(1)).await.unwrap()[..], b"a");
    assert!(!body.reframe(EntitySize::Length(0)).await.unwrap());
    assert_eq!(&body.contents().await.unwrap()[..], b"abc");
}

#[tokio::test]
async fn test_entity_read_errors_surface() {
    let bus = Dispatcher::new();
    let body = EntityBody::streaming(Box::new(&b"xyz\r\n"[..]), EntitySize::Chunked, bus);

    assert!(matches!(
        body.read(None).await,
        Err(HttpError::EntityRead { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reentrant_call_from_receiver_fails() {
    let bus = Dispatcher::new();
    let body = chunked_body(&bus);
    let observed = Arc::new(Mutex::new(Vec::new()));

    let inner = body.clone();
    let sink = observed.clone();
    let _sub = bus.connect(
        Pattern::Only(Signal::RawData),
        Pattern::Only(body.sender_id()),
        move |_: &Notification| {
            let result = tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(inner.tell())
            });
            sink.lock().unwrap().push(result);
            Ok(Reply::Continue)
        },
    );

    let reader = body.clone();
    let contents = tokio::spawn(async move { reader.contents().await })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(&contents[..], b"Wikipedia");
    let observed = observed.lock().unwrap();
    // one per raw chunk, including the zero-size terminator
    assert_eq!(observed.len(), 3);
    assert!(
        observed
            .iter()
            .all(|r| matches!(r, Err(HttpError::ReentrantDispatch("tell"))))
    );
}
