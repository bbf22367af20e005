//! Verification code delivery.
//!
//! Email goes out over SMTP via lettre, SMS through the Twilio REST API.

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;

use cardslawp_core::{Channel, Identifier, VerificationCode};

use crate::config::{SmtpConfig, TwilioConfig};

/// Errors that can occur when delivering a code.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// HTTP request to the SMS provider failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The SMS provider rejected the message.
    #[error("SMS API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The sender does not handle this kind of identifier.
    #[error("cannot deliver to {0} over this channel")]
    WrongChannel(Channel),
}

/// Something that can deliver a verification code.
#[async_trait]
pub trait CodeSender: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, to: &Identifier, code: &VerificationCode) -> Result<(), DeliveryError>;
}

fn email_text(code: &str) -> String {
    format!(
        "Your CardsLawp verification code is {code}.\n\n\
         It expires in 10 minutes. If you did not request it, ignore this email.\n"
    )
}

fn email_html(code: &str) -> String {
    format!(
        "<p>Your CardsLawp verification code is:</p>\
         <p style=\"font-size:24px;font-weight:bold;letter-spacing:4px\">{code}</p>\
         <p>It expires in 10 minutes. If you did not request it, ignore this email.</p>"
    )
}

// =============================================================================
// Email
// =============================================================================

/// Sends codes by email over SMTP.
#[derive(Clone)]
pub struct SmtpEmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpEmailSender {
    /// Create a sender from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the SMTP relay cannot be configured.
    pub fn new(config: &SmtpConfig) -> Result<Self, SmtpError> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        Ok(Self {
            mailer: builder.build(),
            from_address: config.from_address.clone(),
        })
    }
}

#[async_trait]
impl CodeSender for SmtpEmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, to: &Identifier, code: &VerificationCode) -> Result<(), DeliveryError> {
        let Identifier::Email(address) = to else {
            return Err(DeliveryError::WrongChannel(to.channel()));
        };

        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| DeliveryError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(address
                .as_str()
                .parse()
                .map_err(|_| DeliveryError::InvalidAddress(address.masked()))?)
            .subject("Your CardsLawp verification code")
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email_text(code.as_str())),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email_html(code.as_str())),
                    ),
            )?;

        self.mailer.send(email).await?;

        tracing::info!(to = %address.masked(), "Verification email sent");
        Ok(())
    }
}

// =============================================================================
// SMS
// =============================================================================

/// Sends codes by SMS through Twilio.
#[derive(Clone)]
pub struct TwilioSmsSender {
    client: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioSmsSender {
    #[must_use]
    pub fn new(client: reqwest::Client, config: TwilioConfig) -> Self {
        Self { client, config }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base, self.config.account_sid
        )
    }
}

#[async_trait]
impl CodeSender for TwilioSmsSender {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, to: &Identifier, code: &VerificationCode) -> Result<(), DeliveryError> {
        let Identifier::Phone(phone) = to else {
            return Err(DeliveryError::WrongChannel(to.channel()));
        };

        let body = format!("Your CardsLawp verification code is {}", code.as_str());
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(
                &self.config.account_sid,
                Some(self.config.auth_token.expose_secret()),
            )
            .form(&[
                ("To", phone.as_str()),
                ("From", self.config.from_number.as_str()),
                ("Body", body.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::error!(
                status = status.as_u16(),
                to = %phone.masked(),
                "Twilio rejected verification SMS"
            );
            return Err(DeliveryError::Api {
                status: status.as_u16(),
                message,
            });
        }

        tracing::info!(to = %phone.masked(), "Verification SMS sent");
        Ok(())
    }
}
