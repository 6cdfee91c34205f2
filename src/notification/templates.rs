//! Email templates for lifecycle events.

use std::fmt::Write as _;

use super::{NotificationEvent, Payload};
use crate::collaborators::EmailMessage;
use crate::model::{format_cents, Invoice, Order, Subscription};

/// Render the email for `event`.
pub fn render(event: NotificationEvent, payload: &Payload<'_>) -> EmailMessage {
    let (subject, lines) = match payload {
        Payload::Order(order) => order_email(event, order),
        Payload::Invoice {
            subscription,
            invoice,
        } => invoice_email(event, subscription, invoice),
        Payload::Subscription { subscription, note } => {
            subscription_email(event, subscription, *note)
        }
    };
    let greeting = format!("Hi {},", payload.customer().first_name);

    let mut text = String::new();
    let mut html = String::from("<html><body>");
    let _ = writeln!(text, "{}\n", greeting);
    let _ = write!(html, "<p>{}</p>", escape(&greeting));
    for line in &lines {
        let _ = writeln!(text, "{}", line);
        let _ = write!(html, "<p>{}</p>", escape(line));
    }
    text.push_str("\nThe FreshCycle team\n");
    html.push_str("<p>The FreshCycle team</p></body></html>");

    EmailMessage {
        to: payload.customer().email.clone(),
        subject,
        html,
        text,
    }
}

fn order_email(event: NotificationEvent, order: &Order) -> (String, Vec<String>) {
    let n = &order.order_number;
    let mut lines = Vec::new();
    let subject = match event {
        NotificationEvent::OrderConfirmed => {
            lines.push(format!("Thanks for your order {}.", n));
            for item in &order.items {
                lines.push(format!(
                    "{} x {} - {}",
                    item.quantity,
                    item.title,
                    item.line_total().map(format_cents).unwrap_or_default()
                ));
            }
            lines.push(format!("Subtotal: {}", format_cents(order.totals.subtotal_cents)));
            lines.push(format!("Shipping: {}", format_cents(order.totals.shipping_cents)));
            lines.push(format!("Tax: {}", format_cents(order.totals.tax_cents)));
            lines.push(format!("Total: {}", format_cents(order.totals.total_cents)));
            format!("Order confirmed: {}", n)
        }
        NotificationEvent::OrderProcessing => {
            lines.push(format!("We're packing order {} now.", n));
            format!("Your order {} is being prepared", n)
        }
        NotificationEvent::OrderShipped => {
            lines.push(format!("Order {} is on its way.", n));
            if let Some(tracking) = &order.tracking_number {
                let carrier = order.carrier.as_deref().unwrap_or("carrier");
                lines.push(format!("Tracking ({}): {}", carrier, tracking));
            }
            format!("Your order {} has shipped", n)
        }
        NotificationEvent::OrderOutForDelivery => {
            lines.push(format!("Order {} will arrive today.", n));
            format!("Your order {} is out for delivery", n)
        }
        NotificationEvent::OrderDelivered => {
            lines.push(format!("Order {} was delivered. Enjoy!", n));
            format!("Your order {} was delivered", n)
        }
        other => {
            lines.push(format!("Update on order {}.", n));
            format!("Order {}: {}", n, other.as_str())
        }
    };
    (subject, lines)
}

fn invoice_email(
    event: NotificationEvent,
    subscription: &Subscription,
    invoice: &Invoice,
) -> (String, Vec<String>) {
    let mut lines = vec![format!(
        "Invoice {} for {} ({}).",
        invoice.invoice_number,
        format_cents(invoice.amount_cents),
        invoice.billing_date
    )];
    let subject = match event {
        NotificationEvent::SubscriptionBilled => {
            lines.push(format!(
                "Your next box ships {}; we'll bill you again on {}.",
                subscription.frequency.label(),
                subscription.next_billing_date
            ));
            format!("Payment received: {}", invoice.invoice_number)
        }
        NotificationEvent::PaymentFailed => {
            if let Some(reason) = &invoice.error_message {
                lines.push(format!("Your payment did not go through: {}.", reason));
            }
            lines.push(
                "Please update your payment method so your deliveries continue.".to_string(),
            );
            lines.push(format!(
                "We'll try again on {}.",
                subscription.next_billing_date
            ));
            "Payment failed - update your payment method".to_string()
        }
        other => format!("Invoice {}: {}", invoice.invoice_number, other.as_str()),
    };
    (subject, lines)
}

fn subscription_email(
    event: NotificationEvent,
    subscription: &Subscription,
    note: Option<&str>,
) -> (String, Vec<String>) {
    let mut lines = Vec::new();
    let subject = match event {
        NotificationEvent::DeliverySkipped => {
            lines.push(format!(
                "We skipped your next delivery. Your next billing date is {}.",
                subscription.next_billing_date
            ));
            "Your next delivery has been skipped".to_string()
        }
        NotificationEvent::SubscriptionCancelled => {
            lines.push("Your subscription has been cancelled. No further charges will be made.".to_string());
            "Your subscription has been cancelled".to_string()
        }
        NotificationEvent::SubscriptionExpired => {
            lines.push(
                "We could not collect payment after several attempts, so your subscription has ended."
                    .to_string(),
            );
            "Your subscription has ended".to_string()
        }
        other => format!("Subscription update: {}", other.as_str()),
    };
    if let Some(note) = note {
        lines.push(format!("Note: {}", note));
    }
    (subject, lines)
}

/// Minimal HTML escaping for text interpolated into templates.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
