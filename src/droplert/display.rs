//! Drives a [`Presenter`] from the client's notification channel.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::client::NotificationHandle;
use super::protocol::{Notification, Presentation};

/// Banners hide themselves after this long.
pub const BANNER_DISMISS_AFTER: Duration = Duration::from_secs(3);

impl Presentation {
    pub fn auto_dismiss(&self) -> Option<Duration> {
        match self {
            Presentation::Banner => Some(BANNER_DISMISS_AFTER),
            Presentation::Modal | Presentation::Toast => None,
        }
    }
}

pub trait Presenter: Send + 'static {
    fn show(&mut self, presentation: Presentation, notification: &Notification);
    fn clear(&mut self);
}

/// Writes notifications to the log instead of a screen.
pub struct TracingPresenter;

impl Presenter for TracingPresenter {
    fn show(&mut self, presentation: Presentation, notification: &Notification) {
        info!(
            ?presentation,
            title = %notification.title,
            message = %notification.message,
            "🔔 Notification"
        );
    }

    fn clear(&mut self) {
        info!("🔕 Notification dismissed");
    }
}

/// Shows whatever the handle currently holds and keeps following it until
/// `cancel` fires. A banner's timer restarts whenever the notification changes.
pub async fn run_display<P: Presenter>(
    handle: NotificationHandle,
    mut presenter: P,
    cancel: CancellationToken,
) {
    let mut rx = handle.subscribe();
    let mut visible = false;

    loop {
        let shown = rx.borrow_and_update().clone();
        let presentation = shown.as_ref().and_then(|n| n.presentation().map(|p| (p, n)));

        let deadline = match presentation {
            Some((presentation, notification)) => {
                presenter.show(presentation, notification);
                visible = true;
                presentation.auto_dismiss()
            }
            None => {
                if visible {
                    presenter.clear();
                    visible = false;
                }
                None
            }
        };

        let expired = async {
            match deadline {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = expired => handle.dismiss(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::droplert::client::NotificationClient;
    use crate::droplert::protocol::NotificationKind;
    use crate::droplert::transport::WsTransport;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Shown {
        Show(Presentation, String),
        Clear,
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Shown>>>);

    impl Recorder {
        fn events(&self) -> Vec<Shown> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Presenter for Recorder {
        fn show(&mut self, presentation: Presentation, notification: &Notification) {
            self.0
                .lock()
                .unwrap()
                .push(Shown::Show(presentation, notification.title.clone()));
        }

        fn clear(&mut self) {
            self.0.lock().unwrap().push(Shown::Clear);
        }
    }

    fn notification(title: &str, kind: NotificationKind) -> Notification {
        Notification {
            title: title.to_string(),
            kind,
            ..Notification::default()
        }
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    fn unstarted_client() -> NotificationClient {
        NotificationClient::new(
            Arc::new(WsTransport::new("ws://127.0.0.1:9")),
            Some("drop-1".to_string()),
            "https://site.test",
        )
    }

    #[tokio::test(start_paused = true)]
    async fn each_kind_reaches_its_own_variant() {
        let client = unstarted_client();
        let handle = client.handle();
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_display(handle.clone(), recorder.clone(), cancel.clone()));
        settle().await;

        handle.replace(notification("t", NotificationKind::Toast));
        settle().await;
        handle.replace(notification("a", NotificationKind::Alert));
        settle().await;
        handle.replace(notification("d", NotificationKind::AlertDialog));
        settle().await;

        assert_eq!(
            recorder.events(),
            vec![
                Shown::Show(Presentation::Toast, "t".into()),
                Shown::Show(Presentation::Banner, "a".into()),
                Shown::Show(Presentation::Modal, "d".into()),
            ]
        );
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn banner_dismisses_itself() {
        let client = unstarted_client();
        let handle = client.handle();
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_display(handle.clone(), recorder.clone(), cancel.clone()));
        settle().await;

        handle.replace(notification("a", NotificationKind::Alert));
        settle().await;
        tokio::time::advance(BANNER_DISMISS_AFTER).await;
        settle().await;

        assert!(handle.current().is_none());
        assert_eq!(recorder.events().last(), Some(&Shown::Clear));
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn toast_stays_until_dismissed() {
        let client = unstarted_client();
        let handle = client.handle();
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_display(handle.clone(), recorder.clone(), cancel.clone()));
        settle().await;

        handle.replace(notification("t", NotificationKind::Toast));
        settle().await;
        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(handle.current().unwrap().title, "t");

        handle.dismiss();
        settle().await;
        assert_eq!(recorder.events().last(), Some(&Shown::Clear));
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn replacement_restarts_the_banner_timer() {
        let client = unstarted_client();
        let handle = client.handle();
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_display(handle.clone(), recorder.clone(), cancel.clone()));
        settle().await;

        handle.replace(notification("first", NotificationKind::Alert));
        settle().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        handle.replace(notification("second", NotificationKind::Alert));
        settle().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;

        assert_eq!(handle.current().unwrap().title, "second");
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_kind_clears_the_screen() {
        let client = unstarted_client();
        let handle = client.handle();
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_display(handle.clone(), recorder.clone(), cancel.clone()));
        settle().await;

        handle.replace(notification("t", NotificationKind::Toast));
        settle().await;
        handle.replace(notification("?", NotificationKind::Unsupported));
        settle().await;

        assert_eq!(
            recorder.events(),
            vec![Shown::Show(Presentation::Toast, "t".into()), Shown::Clear]
        );
        cancel.cancel();
        task.await.unwrap();
    }
}
