use std::cell::RefCell;
use std::collections::HashMap;
use std::convert::Infallible;
use std::rc::Rc;

use async_trait::async_trait;
use deferload::{
    BatchFunction, ByKey, DeferredExecutionContext, KeyedBatchFunction, LoadError, Loader,
};
use futures::future;

#[derive(Debug, PartialEq, Eq, Clone)]
struct DummyData(String);

#[derive(Default)]
struct DummyContext {
    map: HashMap<i64, String>,
    calls: RefCell<Vec<Vec<i64>>>,
}

impl DummyContext {
    fn with(entries: &[(i64, &str)]) -> Rc<Self> {
        Rc::new(Self {
            map: entries.iter().map(|(k, v)| (*k, (*v).to_owned())).collect(),
            ..Default::default()
        })
    }

    fn calls(&self) -> Vec<Vec<i64>> {
        self.calls.borrow().clone()
    }
}

struct DummyDataLoader;

#[async_trait(?Send)]
impl BatchFunction<i64, Option<DummyData>> for DummyDataLoader {
    type Context = Rc<DummyContext>;
    type Error = Infallible;

    async fn load(
        keys: &[i64],
        context: &Rc<DummyContext>,
    ) -> Result<Vec<Option<DummyData>>, Infallible> {
        context.calls.borrow_mut().push(keys.to_vec());
        Ok(keys.iter().map(|k| context.map.get(k).cloned().map(DummyData)).collect())
    }
}

fn data(s: &str) -> Option<DummyData> {
    Some(DummyData(s.to_owned()))
}

#[tokio::test]
async fn basic_load() {
    let context = DummyContext::with(&[(42, "Foo")]);
    let execution = DeferredExecutionContext::new();
    let loader = Loader::new(DummyDataLoader, Rc::clone(&context), &execution.handle());

    let result =
        execution.execute(async move { Ok::<_, Infallible>(loader.load(42).await) }).await.unwrap();

    assert_eq!(result.unwrap(), data("Foo"));
    assert_eq!(context.calls(), vec![vec![42]]);
}

#[tokio::test]
async fn missing_value_is_none() {
    let context = DummyContext::with(&[(42, "Foo")]);
    let execution = DeferredExecutionContext::new();
    let loader = Loader::new(DummyDataLoader, context, &execution.handle());

    let result =
        execution.execute(async move { Ok::<_, Infallible>(loader.load(15).await) }).await.unwrap();

    assert_eq!(result.unwrap(), None);
}

#[tokio::test]
async fn repeated_load_refetches_in_next_round() {
    let context = DummyContext::with(&[(42, "Foo")]);
    let execution = DeferredExecutionContext::new();
    let loader = Loader::new(DummyDataLoader, Rc::clone(&context), &execution.handle());

    let (first, second) = execution
        .execute(async move {
            let first = loader.load(42).await;
            let second = loader.load(42).await;
            Ok::<_, Infallible>((first, second))
        })
        .await
        .unwrap();

    assert_eq!(first.unwrap(), data("Foo"));
    assert_eq!(second.unwrap(), data("Foo"));
    assert_eq!(context.calls(), vec![vec![42], vec![42]]);
}

#[tokio::test]
async fn repeated_load_with_cache() {
    let context = DummyContext::with(&[(42, "Foo")]);
    let execution = DeferredExecutionContext::new();
    let loader = Loader::with_cache(
        DummyDataLoader,
        Rc::clone(&context),
        &execution.handle(),
        HashMap::new(),
    );
    let probe = loader.clone();

    let (first, second) = execution
        .execute(async move {
            let first = loader.load(42).await;
            let second = loader.load(42).await;
            Ok::<_, Infallible>((first, second))
        })
        .await
        .unwrap();

    assert_eq!(first.unwrap(), data("Foo"));
    assert_eq!(second.unwrap(), data("Foo"));
    assert_eq!(context.calls(), vec![vec![42]]);
    assert_eq!(probe.dispatch_count(), 1);
}

#[tokio::test]
async fn basic_load_many() {
    let context = DummyContext::with(&[
        (42, "one fish"),
        (12, "two fish"),
        (5, "red fish"),
        (8, "blue fish"),
    ]);
    let execution = DeferredExecutionContext::new();
    let loader = Loader::new(DummyDataLoader, Rc::clone(&context), &execution.handle());

    let values = execution
        .execute(async move { Ok::<_, Infallible>(loader.load_many(vec![5, 12, 8]).await) })
        .await
        .unwrap();

    assert_eq!(
        values.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
        vec![data("red fish"), data("two fish"), data("blue fish")]
    );
    assert_eq!(context.calls(), vec![vec![5, 12, 8]]);
}

#[tokio::test]
async fn load_async() {
    let context = DummyContext::with(&[
        (42, "one fish"),
        (12, "two fish"),
        (5, "red fish"),
        (8, "blue fish"),
    ]);
    let execution = DeferredExecutionContext::new();
    let loader = Loader::new(DummyDataLoader, Rc::clone(&context), &execution.handle());

    let (five, many, missing, twelve) = execution
        .execute(async move {
            let tuple = future::join4(
                loader.load(5),
                loader.load_many(vec![5, 42]),
                loader.load(99),
                loader.load(12),
            );
            Ok::<_, Infallible>(tuple.await)
        })
        .await
        .unwrap();

    assert_eq!(five.unwrap(), data("red fish"));
    assert_eq!(
        many.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
        vec![data("red fish"), data("one fish")]
    );
    assert_eq!(missing.unwrap(), None);
    assert_eq!(twelve.unwrap(), data("two fish"));
    assert_eq!(context.calls(), vec![vec![5, 42, 99, 12]]);
}

#[tokio::test]
async fn prime_skips_batch_function() {
    let context = Rc::new(DummyContext::default());
    let execution = DeferredExecutionContext::new();
    let loader = Loader::with_cache(
        DummyDataLoader,
        Rc::clone(&context),
        &execution.handle(),
        HashMap::new(),
    );
    loader.prime(7, data("primed"));
    loader.prime_many(vec![(8, data("eight")), (9, None)]);
    let probe = loader.clone();

    let values = execution
        .execute(async move { Ok::<_, Infallible>(loader.load_many(vec![7, 8, 9]).await) })
        .await
        .unwrap();

    assert_eq!(
        values.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
        vec![data("primed"), data("eight"), None]
    );
    assert!(context.calls().is_empty());
    assert_eq!(probe.dispatch_count(), 0);
}

#[tokio::test]
async fn clear_forces_reload() {
    let context = DummyContext::with(&[(1, "one"), (2, "two")]);
    let execution = DeferredExecutionContext::new();
    let loader = Loader::with_cache(
        DummyDataLoader,
        Rc::clone(&context),
        &execution.handle(),
        HashMap::new(),
    );
    loader.prime_many(vec![(1, data("stale one")), (2, data("stale two"))]);

    let values = execution
        .execute(async move {
            loader.clear(1);
            let first = loader.load_many(vec![1, 2]).await;
            loader.clear_many(vec![2]);
            let second = loader.load(2).await;
            loader.clear_all();
            let third = loader.load(1).await;
            Ok::<_, Infallible>((first, second, third))
        })
        .await
        .unwrap();

    let (first, second, third) = values;
    assert_eq!(
        first.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
        vec![data("one"), data("stale two")]
    );
    assert_eq!(second.unwrap(), data("two"));
    assert_eq!(third.unwrap(), data("one"));
    assert_eq!(context.calls(), vec![vec![1], vec![2], vec![1]]);
}

#[tokio::test]
async fn manual_flush_dispatches_immediately() {
    let context = DummyContext::with(&[(3, "three")]);
    let execution = DeferredExecutionContext::new();
    let handle = execution.handle();
    let loader = Loader::new(DummyDataLoader, Rc::clone(&context), &execution.handle());

    let pending = execution
        .execute(async move {
            let value = loader.load(3);
            assert!(loader.has_pending());
            loader.flush().await;
            assert!(!loader.has_pending());
            Ok::<_, Infallible>(value.await)
        })
        .await
        .unwrap();

    assert_eq!(pending.unwrap(), data("three"));
    assert_eq!(context.calls(), vec![vec![3]]);
    // The end-of-wave flush found nothing left to dispatch.
    assert_eq!(handle.round(), 0);
}

struct ShuffledLoader;

#[async_trait(?Send)]
impl KeyedBatchFunction<i64, String> for ShuffledLoader {
    type Context = HashMap<i64, String>;
    type Error = Infallible;

    async fn load(
        keys: &[i64],
        context: &HashMap<i64, String>,
    ) -> Result<Vec<(i64, String)>, Infallible> {
        Ok(keys.iter().rev().filter_map(|k| context.get(k).cloned().map(|v| (*k, v))).collect())
    }
}

#[tokio::test]
async fn keyed_batch_function_is_reordered() {
    let mut context = HashMap::new();
    context.insert(2001, "a space odyssey".to_owned());
    context.insert(7, "samurai".to_owned());
    context.insert(12, "angry men".to_owned());

    let execution = DeferredExecutionContext::new();
    let loader: Loader<i64, String> =
        Loader::new(ByKey::<ShuffledLoader>::default(), context, &execution.handle());

    let values = execution
        .execute(async move { Ok::<_, Infallible>(loader.load_many(vec![12, 2001, 7]).await) })
        .await
        .unwrap();

    assert_eq!(
        values.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
        vec!["angry men".to_owned(), "a space odyssey".to_owned(), "samurai".to_owned()]
    );
}

#[tokio::test]
async fn keyed_batch_function_missing_key_fails_batch() {
    let mut context = HashMap::new();
    context.insert(7, "samurai".to_owned());

    let execution = DeferredExecutionContext::new();
    let loader: Loader<i64, String> =
        Loader::new(ByKey::<ShuffledLoader>::default(), context, &execution.handle());

    let values = execution
        .execute(async move { Ok::<_, Infallible>(loader.load_many(vec![7, 2010]).await) })
        .await
        .unwrap();

    for value in values {
        match value {
            Err(LoadError::BatchFunction(error)) => {
                assert_eq!(error.to_string(), "batch function returned no value for key 2010");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
