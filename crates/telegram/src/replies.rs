//! Fixed reply texts sent by the bot itself, outside the assistant pipeline.

pub const START_GREETING: &str = "Hola, soy tu asesor financiero. ¿En qué puedo ayudarte hoy?";

pub const HELP_TEXT: &str = "Puedo ayudarte con tu negocio:\n\
- Registrar ventas y gastos: 'Vendí 2 gorras por $40,000'\n\
- Revisar tus finanzas: '¿Cómo voy este mes?'\n\
- Consultar o cargar inventario: 'Agregar Laptop, categoria Electrónica, stock 5, min 2'\n\
Comandos: /registrar <movimiento>, /reset para empezar de nuevo, /help para ver esta ayuda.";

pub const RESET_CONFIRMATION: &str = "Listo, empecemos de nuevo. ¿En qué te ayudo?";

pub const REGISTRAR_USAGE: &str =
    "Escribe el movimiento después del comando, por ejemplo: /registrar Vendí 2 gorras por 40000";

pub const UNKNOWN_COMMAND: &str = "No conozco ese comando. Escribe /help para ver lo que puedo hacer.";

pub const APOLOGY: &str =
    "Perdón, tuve un problema procesando tu mensaje. ¿Puedes intentarlo de nuevo en unos segundos?";

/// Guarantees a non-empty outbound text.
pub fn non_empty(text: String) -> String {
    if text.trim().is_empty() {
        APOLOGY.to_string()
    } else {
        text
    }
}
