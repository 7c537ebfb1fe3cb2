//! Email service for registration confirmations and image delivery.

use async_trait::async_trait;
use lettre::{
    Address, AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Attachment, Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::path::{Path, PathBuf};
use tracing::instrument;

use crate::{
    config::{Config, EmailTransportConfig},
    db::models::users::UserDBResponse,
    errors::Error,
};

/// Port on which SMTP servers expect TLS from the first byte rather than STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

/// Outgoing notifications triggered by registration and completed search requests.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Confirm a new registration, including the assigned user id.
    async fn send_registration_email(&self, user: &UserDBResponse) -> Result<(), Error>;

    /// Deliver materialized images as attachments. Paths that no longer exist are skipped.
    async fn send_images_email(&self, user: &UserDBResponse, prompt: &str, image_paths: &[PathBuf]) -> Result<(), Error>;
}

pub struct EmailService {
    transport: EmailTransport,
    from_email: String,
    from_name: String,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let email_config = &config.email;

        let transport = match &email_config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
                timeout,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if *use_tls && *port == IMPLICIT_TLS_PORT {
                    AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                } else if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port)
                .timeout(Some(*timeout))
                .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                // Use file transport for development/testing
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        Ok(Self {
            transport,
            from_email: email_config.from_email.clone(),
            from_name: email_config.from_name.clone(),
        })
    }

    fn mailboxes(&self, to_email: &str, to_name: &str) -> Result<(Mailbox, Mailbox), Error> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("parse from email: {e}"),
            })?;

        // Built from parts so names containing commas or quotes need no escaping
        let to_address = to_email.parse::<Address>().map_err(|e| Error::Internal {
            operation: format!("parse to email: {e}"),
        })?;
        let to = Mailbox::new(Some(to_name.to_string()), to_address);

        Ok((from, to))
    }

    async fn send_message(&self, message: Message) -> Result<(), Error> {
        // Send based on transport type
        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send file email: {e}"),
                })?;
            }
        }

        Ok(())
    }

    fn create_registration_body(user: &UserDBResponse) -> String {
        format!(
            "Hello {name},\n\n\
             Thank you for registering with SnapNSend!\n\n\
             Your account has been successfully created with the following details:\n\
             - User Name: {name}\n\
             - User Email: {mail}\n\
             - User ID: {id}\n\n\
             You can now start sending prompts. If you have any questions, feel free to contact us.\n\n\
             Best regards,\n\
             The SnapNSend Team\n",
            name = user.user_name,
            mail = user.user_mail,
            id = user.id,
        )
    }

    fn create_images_body(user: &UserDBResponse, prompt: &str, attached: usize) -> String {
        format!(
            "Hello {name},\n\n\
             Here are the {attached} images found for your prompt: '{prompt}'\n\n\
             We hope you enjoy these images!\n\n\
             Best regards,\n\
             The SnapNSend Team\n",
            name = user.user_name,
        )
    }
}

/// Load a file as a mail attachment named after its basename.
///
/// Returns `Ok(None)` if the file has disappeared since it was materialized.
async fn load_attachment(path: &Path) -> Result<Option<SinglePart>, Error> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "Image file not found, skipping attachment");
            return Ok(None);
        }
        Err(e) => {
            return Err(Error::Internal {
                operation: format!("read attachment {}: {e}", path.display()),
            });
        }
    };

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let content_type = ContentType::parse(mime.as_ref()).map_err(|e| Error::Internal {
        operation: format!("parse content type {mime}: {e}"),
    })?;

    Ok(Some(Attachment::new(filename).body(bytes, content_type)))
}

#[async_trait]
impl Notifier for EmailService {
    #[instrument(skip(self, user), fields(user_id = %crate::types::abbrev_uuid(&user.id)), err)]
    async fn send_registration_email(&self, user: &UserDBResponse) -> Result<(), Error> {
        let (from, to) = self.mailboxes(&user.user_mail, &user.user_name)?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject("Welcome to SnapNSend - Registration Confirmation")
            .header(ContentType::TEXT_PLAIN)
            .body(Self::create_registration_body(user))
            .map_err(|e| Error::Internal {
                operation: format!("build email message: {e}"),
            })?;

        self.send_message(message).await?;
        tracing::info!("Registration email sent");
        Ok(())
    }

    #[instrument(skip(self, user, image_paths), fields(user_id = %crate::types::abbrev_uuid(&user.id), images = image_paths.len()), err)]
    async fn send_images_email(&self, user: &UserDBResponse, prompt: &str, image_paths: &[PathBuf]) -> Result<(), Error> {
        let (from, to) = self.mailboxes(&user.user_mail, &user.user_name)?;

        let mut attachments = Vec::with_capacity(image_paths.len());
        for path in image_paths {
            if let Some(part) = load_attachment(path).await? {
                attachments.push(part);
            }
        }

        let mut body = MultiPart::mixed().singlepart(SinglePart::plain(Self::create_images_body(user, prompt, attachments.len())));
        for part in attachments {
            body = body.singlepart(part);
        }

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(format!("Your Images - Found for Prompt: '{prompt}'"))
            .multipart(body)
            .map_err(|e| Error::Internal {
                operation: format!("build email message: {e}"),
            })?;

        self.send_message(message).await?;
        tracing::info!("Images email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_config;
    use chrono::Utc;
    use uuid::Uuid;

    fn test_user() -> UserDBResponse {
        UserDBResponse {
            id: Uuid::new_v4(),
            user_name: "alice".to_string(),
            user_mail: "alice@example.com".to_string(),
            created_at: Utc::now(),
        }
    }

    fn file_config(dir: &Path) -> Config {
        let mut config = create_test_config(dir);
        config.email.transport = EmailTransportConfig::File {
            path: dir.to_string_lossy().into_owned(),
        };
        config
    }

    fn written_emails(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| std::fs::read_to_string(entry.unwrap().path()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_email_service_creation() {
        let dir = tempfile::tempdir().unwrap();
        let email_service = EmailService::new(&file_config(dir.path()));
        assert!(email_service.is_ok());
    }

    #[test]
    fn test_registration_body() {
        let user = test_user();
        let body = EmailService::create_registration_body(&user);

        assert!(body.contains("Hello alice,"));
        assert!(body.contains("alice@example.com"));
        assert!(body.contains(&user.id.to_string()));
    }

    #[tokio::test]
    async fn test_registration_email_written_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let email_service = EmailService::new(&file_config(dir.path())).unwrap();

        email_service.send_registration_email(&test_user()).await.unwrap();

        let emails = written_emails(dir.path());
        assert_eq!(emails.len(), 1);
        assert!(emails[0].contains("Registration Confirmation"));
        assert!(emails[0].contains("alice@example.com"));
    }

    #[tokio::test]
    async fn test_images_email_attaches_existing_files() {
        let mail_dir = tempfile::tempdir().unwrap();
        let image_dir = tempfile::tempdir().unwrap();
        let email_service = EmailService::new(&file_config(mail_dir.path())).unwrap();

        let present = image_dir.path().join("placeholder_img_01.jpg");
        std::fs::write(&present, [0xFF, 0xD8, 0xFF, 0xD9]).unwrap();
        let missing = image_dir.path().join("img_02.jpg");

        email_service
            .send_images_email(&test_user(), "mountains", &[present, missing])
            .await
            .unwrap();

        let emails = written_emails(mail_dir.path());
        assert_eq!(emails.len(), 1);
        assert!(emails[0].contains("placeholder_img_01.jpg"));
        assert!(!emails[0].contains("img_02.jpg"));
        assert!(emails[0].contains("image/jpeg"));
    }
}
