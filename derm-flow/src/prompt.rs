//! Prompt assembly for the response service.
//!
//! Every template constrains the answer to Turkish. Functions here are pure.

use crate::classifier::ClassificationResult;

/// System-role persona sent with every completion request.
pub const SYSTEM_INSTRUCTION: &str = "Sen yardımcı bir dermatoloji uzmanısın. Tıbbi terimleri kullanırken mutlaka açıklamalarını da ekle ve hasta dostu bir dil kullan. Yanıtlarını yalnızca Türkçe ver.";

/// First assistant message of every session.
pub const GREETING: &str = "👋 Merhaba! Ben DermNet AI Asistanınızım. Size cilt sağlığınız konusunda yardımcı olmak için buradayım.\n\n📷 Bir fotoğraf yükleyerek analiz yaptırabilir veya cilt sağlığı ile ilgili sorularınızı sorabilirsiniz.";

pub const DISCLAIMER: &str = "⚠️ Önemli Not: Bu uygulama bir tıbbi tanı aracı değildir. Sonuçlar yalnızca bilgilendirme amaçlıdır; kesin tanı ve tedavi için mutlaka bir dermatoloji uzmanına başvurunuz.";

const TURKISH_ONLY: &str = "ÖNEMLİ: Yanıtın tamamen Türkçe olsun, İngilizce kelime kullanma.";

/// Format a `[0, 1]` probability as a two-decimal percentage, e.g. `87.00%`.
pub fn format_confidence(confidence: f32) -> String {
    format!("{:.2}%", f64::from(confidence) * 100.0)
}

/// Merge the user's question with the current analysis, if any.
pub fn build_prompt(user_text: &str, prior: Option<&ClassificationResult>) -> String {
    match prior {
        Some(result) => format!(
            "Kullanıcı sorusu: {user_text}\n\n\
             Bağlam: Az önce analiz edilen fotoğrafta {label} tespit edildi (güven: {confidence}).\n\n\
             Bu bağlamda kullanıcının sorusunu TÜRKÇE yanıtla. Eğer soru analizle ilgiliyse bu sonucu referans al.\n\n\
             {TURKISH_ONLY}",
            label = result.label,
            confidence = format_confidence(result.confidence),
        ),
        None => format!(
            "Kullanıcı sorusu: {user_text}\n\n\
             Cilt sağlığı konusunda genel bilgilendirme yap.\n\n\
             {TURKISH_ONLY}"
        ),
    }
}

/// Assistant message announcing a fresh analysis.
pub fn diagnosis_message(result: &ClassificationResult) -> String {
    format!(
        "📊 **Tahmini Teşhis:** {}\n🔎 **Model Güveni:** {}\n\n\
         Bu sonuca göre size nasıl yardımcı olabilirim? Tedavi seçenekleri, önleyici tedbirler veya bu durum hakkında merak ettiğiniz konuları sorabilirsiniz.",
        result.label,
        format_confidence(result.confidence),
    )
}

/// Structured patient-facing report request for the current analysis.
pub fn report_prompt(result: &ClassificationResult) -> String {
    format!(
        "Bir dermatoloji uzmanı olarak yanıt ver.\n\
         Hastanın cilt görüntüsü analiz edildi ve {confidence} doğruluk oranıyla '{label}' tespit edildi.\n\n\
         Lütfen aşağıdaki bilgileri sağla:\n\
         1. Bu hastalığın kısa bir açıklaması\n\
         2. Yaygın semptomları\n\
         3. Olası tedavi yöntemleri\n\
         4. Önleyici tedbirler\n\
         5. Ne zaman bir doktora başvurulmalı\n\n\
         Yanıtını maddeler halinde, anlaşılır ve hasta dostu bir dille ver.\n\n\
         {TURKISH_ONLY}",
        confidence = format_confidence(result.confidence),
        label = result.label,
    )
}
